use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::PluginError;
use crate::types::FilterModule;

/// Resolves a filter id to executable code. How modules are actually loaded
/// (and sandboxed) is the host's concern.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load_filter(&self, id: &str) -> Result<Arc<dyn FilterModule>, PluginError>;
}

/// Storage for filter enablement and valve configuration.
#[async_trait]
pub trait FilterStore: Send + Sync {
    /// Ids of filters installed globally, in discovery order.
    async fn global_filter_ids(&self) -> Vec<String>;

    /// Ids of currently-enabled filter-type plugins. Anything outside this
    /// set never runs, no matter what declares it.
    async fn enabled_filter_ids(&self) -> Vec<String>;

    /// Installation-level valves for a filter, when configured.
    async fn get_valves(&self, id: &str) -> Option<Value>;

    /// Per-(filter, user) valves. A failure here degrades the chain but
    /// never aborts it.
    async fn get_user_valves(&self, id: &str, user_id: &str)
        -> Result<Option<Value>, PluginError>;
}

/// Process-lifetime cache of loaded filter modules, keyed by id.
///
/// Population is idempotent — two turns racing to load the same id both
/// succeed and one of the loaded modules wins the slot. No lock beyond what
/// the map primitive provides.
pub struct FilterRegistry {
    loader: Arc<dyn PluginLoader>,
    cache: DashMap<String, Arc<dyn FilterModule>>,
}

impl FilterRegistry {
    pub fn new(loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            loader,
            cache: DashMap::new(),
        }
    }

    /// Load-and-cache a filter module by id.
    pub async fn resolve(&self, id: &str) -> Result<Arc<dyn FilterModule>, PluginError> {
        if let Some(module) = self.cache.get(id) {
            return Ok(Arc::clone(&module));
        }

        let module = self.loader.load_filter(id).await?;
        debug!(filter = id, "filter module loaded");

        // Insert-if-absent: a concurrent loader may have won the race.
        let entry = self
            .cache
            .entry(id.to_string())
            .or_insert(module);
        Ok(Arc::clone(&entry))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Capability;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFilter {
        id: String,
    }

    #[async_trait]
    impl FilterModule for StaticFilter {
        fn id(&self) -> &str {
            &self.id
        }
        fn capabilities(&self) -> &[Capability] {
            &[]
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl PluginLoader for CountingLoader {
        async fn load_filter(&self, id: &str) -> Result<Arc<dyn FilterModule>, PluginError> {
            if id == "missing" {
                return Err(PluginError::NotFound { id: id.to_string() });
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StaticFilter { id: id.to_string() }))
        }
    }

    #[tokio::test]
    async fn resolve_caches_by_id() {
        let loader = Arc::new(CountingLoader { loads: AtomicUsize::new(0) });
        let registry = FilterRegistry::new(loader.clone());

        registry.resolve("a").await.unwrap();
        registry.resolve("a").await.unwrap();
        registry.resolve("b").await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(registry.cached_len(), 2);
    }

    #[tokio::test]
    async fn resolve_propagates_load_failure() {
        let loader = Arc::new(CountingLoader { loads: AtomicUsize::new(0) });
        let registry = FilterRegistry::new(loader);

        let err = registry.resolve("missing").await.err().unwrap();
        assert!(matches!(err, PluginError::NotFound { .. }));
        assert_eq!(registry.cached_len(), 0);
    }
}
