use serde_json::{json, Value};

/// Marker prefixing each payload line of an event stream.
pub const STREAM_DATA_PREFIX: &str = "data: ";

/// Terminal sentinel some backends send as a final data line. Tolerated but
/// never acted on — termination is driven by stream exhaustion.
pub const STREAM_DONE_SENTINEL: &str = "[DONE]";

/// A tagged payload sent to the live transport. Delivery is fire-and-forget;
/// order within one chat turn must match emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Either a full response object or an incremental
    /// `{content, done?, title?}` shape.
    Completion(Value),
    Title(String),
    Tags(Value),
    TaskCancelled,
}

impl Event {
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Completion(_) => "chat:completion",
            Event::Title(_) => "chat:title",
            Event::Tags(_) => "chat:tags",
            Event::TaskCancelled => "task-cancelled",
        }
    }

    /// Wire shape: `{"type": <tag>, "data": <payload>}`; the cancellation
    /// signal carries no data.
    pub fn to_value(&self) -> Value {
        match self {
            Event::Completion(data) => json!({"type": self.tag(), "data": data}),
            Event::Title(title) => json!({"type": self.tag(), "data": title}),
            Event::Tags(tags) => json!({"type": self.tag(), "data": tags}),
            Event::TaskCancelled => json!({"type": self.tag()}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_wire_vocabulary() {
        assert_eq!(Event::Completion(json!({})).tag(), "chat:completion");
        assert_eq!(Event::Title("t".into()).tag(), "chat:title");
        assert_eq!(Event::Tags(json!([])).tag(), "chat:tags");
        assert_eq!(Event::TaskCancelled.tag(), "task-cancelled");
    }

    #[test]
    fn wire_shape() {
        let event = Event::Completion(json!({"content": "hi"}));
        assert_eq!(
            event.to_value(),
            json!({"type": "chat:completion", "data": {"content": "hi"}})
        );
        assert_eq!(Event::TaskCancelled.to_value(), json!({"type": "task-cancelled"}));
    }
}
