//! Intent resolutions.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use interop_channels::{Channel, ChannelKind, Channels};
use interop_transport::{Error, Instance, InstanceId, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

/// Identifies an application, and optionally one of its instances.
///
/// Used both as the source of a resolution and as the target of a raise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentifier {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
}

impl AppIdentifier {
    pub fn app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            instance_id: None,
        }
    }

    pub fn instance(instance: &Instance) -> Self {
        Self {
            app_id: instance.application.clone(),
            instance_id: Some(instance.id),
        }
    }

    /// Whether `instance` is the application (and instance, if given)
    /// this identifier names.
    pub fn accepts(&self, instance: &Instance) -> bool {
        instance.application == self.app_id
            && self.instance_id.map_or(true, |id| id == instance.id)
    }
}

/// The settled outcome of a raised intent.
#[derive(Debug)]
pub enum IntentResult {
    Context(Value),
    Channel(Channel),
    Void,
}

impl IntentResult {
    pub fn context(&self) -> Option<&Value> {
        match self {
            IntentResult::Context(context) => Some(context),
            _ => None,
        }
    }

    pub fn channel(&self) -> Option<&Channel> {
        match self {
            IntentResult::Channel(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IntentResult::Void)
    }
}

type PendingCall = Shared<BoxFuture<'static, Result<Value>>>;

/// A raised intent whose handler has been chosen and invoked.
///
/// The handler keeps running whether or not anyone asks for the result.
/// [`get_result`](Self::get_result) settles once; every call returns the
/// same outcome, and on success the same `Arc`.
pub struct IntentResolution {
    source: AppIdentifier,
    intent: String,
    call: PendingCall,
    result: OnceCell<Result<Arc<IntentResult>>>,
    channels: Channels,
}

impl IntentResolution {
    pub(crate) fn new(
        source: AppIdentifier,
        intent: &str,
        call: BoxFuture<'static, Result<Value>>,
        channels: Channels,
    ) -> Self {
        Self {
            source,
            intent: intent.to_string(),
            call: call.shared(),
            result: OnceCell::new(),
            channels,
        }
    }

    /// The instance handling the intent.
    pub fn source(&self) -> &AppIdentifier {
        &self.source
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    /// Wait for the handler and interpret what it returned.
    ///
    /// # Errors
    ///
    /// * `Handler` - the handler failed or panicked.
    /// * `NotFound` - the handler went away before it could be called, or
    ///   returned a channel that does not exist.
    /// * `Conflict` - the handler returned a private channel someone else
    ///   already claimed.
    pub async fn get_result(&self) -> Result<Arc<IntentResult>> {
        self.result
            .get_or_init(|| async {
                let value = self.call.clone().await?;
                self.interpret(value).map(Arc::new)
            })
            .await
            .clone()
    }

    fn interpret(&self, value: Value) -> Result<IntentResult> {
        let Value::Object(map) = value else {
            return Ok(IntentResult::Void);
        };

        if map.get("privateChannel").and_then(Value::as_bool) == Some(true) {
            let id = map
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::handler("private channel result without an id"))?;
            debug!(intent = %self.intent, channel = id, "claiming private channel result");
            return self
                .channels
                .claim_private_channel(id)
                .map(IntentResult::Channel);
        }

        if let Some(context) = map.get("context") {
            return Ok(IntentResult::Context(context.clone()));
        }

        if let Some(channel) = map.get("channel") {
            let id = channel.get("id").and_then(Value::as_str);
            let kind = channel
                .get("type")
                .cloned()
                .and_then(|kind| serde_json::from_value::<ChannelKind>(kind).ok());
            let (Some(id), Some(kind)) = (id, kind) else {
                return Err(Error::handler(format!(
                    "malformed channel result: {}",
                    channel
                )));
            };
            return self.channels.channel(kind, id).map(IntentResult::Channel);
        }

        Ok(IntentResult::Void)
    }
}

impl std::fmt::Debug for IntentResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentResolution")
            .field("source", &self.source)
            .field("intent", &self.intent)
            .field("settled", &self.result.initialized())
            .finish()
    }
}
