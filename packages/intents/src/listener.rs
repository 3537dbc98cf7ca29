//! Intent listeners and the handler result wire format.

use std::sync::atomic::{AtomicBool, Ordering};

use interop_channels::{Channel, ChannelKind};
use interop_context_store::ContextStore;
use interop_transport::{InstanceId, MethodRegistration};
use serde_json::{json, Value};
use tracing::{debug, warn};

const INTENT_METHOD_PREFIX: &str = "___intent___";
const LISTENER_CLAIMS_PREFIX: &str = "___intentListeners___";

/// The interop method serving intent `intent`.
pub fn intent_method(intent: &str) -> String {
    format!("{}{}", INTENT_METHOD_PREFIX, intent)
}

/// The document holding one claim slot per intent an instance listens to.
pub(crate) fn listener_claims(instance: InstanceId) -> String {
    format!("{}{}", LISTENER_CLAIMS_PREFIX, instance)
}

/// What an intent handler hands back to the raiser.
#[derive(Debug)]
pub enum IntentHandlerResult {
    Context(Value),
    /// A channel the raiser should join. Private channels are claimed by
    /// the raiser when it reads the result.
    Channel(Channel),
    Void,
}

impl IntentHandlerResult {
    pub(crate) fn into_wire(self) -> Value {
        match self {
            IntentHandlerResult::Context(context) => json!({ "context": context }),
            IntentHandlerResult::Channel(channel) if channel.kind() == ChannelKind::Private => {
                json!({ "privateChannel": true, "id": channel.id() })
            }
            IntentHandlerResult::Channel(channel) => {
                json!({ "channel": { "id": channel.id(), "type": channel.kind() } })
            }
            IntentHandlerResult::Void => Value::Null,
        }
    }
}

impl From<Value> for IntentHandlerResult {
    fn from(context: Value) -> Self {
        IntentHandlerResult::Context(context)
    }
}

impl From<Channel> for IntentHandlerResult {
    fn from(channel: Channel) -> Self {
        IntentHandlerResult::Channel(channel)
    }
}

impl From<()> for IntentHandlerResult {
    fn from(_: ()) -> Self {
        IntentHandlerResult::Void
    }
}

/// A registered intent listener.
///
/// Holds the `(intent, instance)` claim ticket and the method
/// registration. [`unsubscribe`](Self::unsubscribe) releases both, after
/// which the same instance may listen to the intent again.
pub struct IntentListener {
    intent: String,
    registration: MethodRegistration,
    store: ContextStore,
    claims: String,
    claimant: String,
    released: AtomicBool,
}

impl IntentListener {
    pub(crate) fn new(
        intent: &str,
        registration: MethodRegistration,
        store: ContextStore,
        claims: String,
        claimant: String,
    ) -> Self {
        Self {
            intent: intent.to_string(),
            registration,
            store,
            claims,
            claimant,
            released: AtomicBool::new(false),
        }
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registration.unregister();
        if let Err(e) = self.store.release(&self.claims, &self.intent, &self.claimant) {
            warn!(intent = %self.intent, error = %e, "failed to release intent listener claim");
        }
        debug!(intent = %self.intent, "intent listener removed");
    }
}

impl std::fmt::Debug for IntentListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentListener")
            .field("intent", &self.intent)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes() {
        assert_eq!(
            IntentHandlerResult::from(json!({"type": "t"})).into_wire(),
            json!({"context": {"type": "t"}})
        );
        assert_eq!(IntentHandlerResult::from(()).into_wire(), Value::Null);
    }

    #[test]
    fn method_names() {
        assert_eq!(intent_method("ViewChart"), "___intent___ViewChart");
        let id = InstanceId::new();
        assert_eq!(listener_claims(id), format!("___intentListeners___{}", id));
    }
}
