//! Channel lifecycle events.

use serde::{Deserialize, Serialize};

/// Listener churn and disconnection on a channel.
///
/// One party publishes these on the channel's event topic; the other
/// party's hooks receive them. A party never sees its own events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ChannelEvent {
    /// The other party added a context listener.
    AddContextListener {
        listener_id: String,
        context_type: Option<String>,
    },
    /// The other party removed a context listener.
    Unsubscribe {
        listener_id: String,
        context_type: Option<String>,
    },
    /// The other party disconnected.
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape() {
        let event = ChannelEvent::AddContextListener {
            listener_id: "l1".into(),
            context_type: Some("fdc3.contact".into()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "addContextListener", "listenerId": "l1", "contextType": "fdc3.contact"})
        );
        assert_eq!(
            serde_json::to_value(ChannelEvent::Disconnect).unwrap(),
            json!({"event": "disconnect"})
        );
    }

    #[test]
    fn parses_unsubscribe() {
        let event: ChannelEvent = serde_json::from_value(
            json!({"event": "unsubscribe", "listenerId": "l2", "contextType": null}),
        )
        .unwrap();
        assert_eq!(
            event,
            ChannelEvent::Unsubscribe {
                listener_id: "l2".into(),
                context_type: None
            }
        );
    }
}
