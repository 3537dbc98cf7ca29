//! Message, method and discovery types carried by the bus.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::instance::{Instance, InstanceId};

/// A published message as seen by a topic subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
    pub publisher: Instance,
}

/// A single call of an interop method.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Name of the invoked method.
    pub method: String,
    /// Arguments, owned by the callee.
    pub args: Value,
    /// The instance that made the call.
    pub caller: Instance,
}

/// Type-erased async method handler.
pub type MethodHandler = Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Box an async closure into a [`MethodHandler`].
pub fn method_handler<F, Fut>(handler: F) -> MethodHandler
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |invocation| Box::pin(handler(invocation)))
}

/// Which server(s) an invocation is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The earliest-registered live server of the method.
    Best,
    /// A specific instance.
    Instance(InstanceId),
    /// The earliest-registered server belonging to an application.
    Application(String),
}

impl Target {
    /// Whether `server` is acceptable for this target.
    pub fn accepts(&self, server: &Instance) -> bool {
        match self {
            Target::Best => true,
            Target::Instance(id) => server.id == *id,
            Target::Application(name) => server.application == *name,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Best => write!(f, "best"),
            Target::Instance(id) => write!(f, "instance {}", id),
            Target::Application(name) => write!(f, "application '{}'", name),
        }
    }
}

/// Method discovery events emitted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// The first server of a method name appeared.
    MethodAdded { method: String },
    /// The last server of a method name went away.
    MethodRemoved { method: String },
    /// A server registered a method.
    ServerMethodAdded { server: Instance, method: String },
    /// A server unregistered a method, or disconnected.
    ServerMethodRemoved { server: Instance, method: String },
}

impl DiscoveryEvent {
    /// The method name this event is about.
    pub fn method(&self) -> &str {
        match self {
            DiscoveryEvent::MethodAdded { method }
            | DiscoveryEvent::MethodRemoved { method }
            | DiscoveryEvent::ServerMethodAdded { method, .. }
            | DiscoveryEvent::ServerMethodRemoved { method, .. } => method,
        }
    }
}
