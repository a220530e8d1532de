//! Shared foundation for the relay workspace: configuration, the common
//! error type, and the id/user/model/task types every stage speaks.

pub mod config;
pub mod error;
pub mod types;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
