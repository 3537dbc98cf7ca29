//! The application launcher seam.

use async_trait::async_trait;
use interop_transport::{Error, Instance, InstanceId, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directory::ApplicationDefinition;

/// Asks a started application to fetch its opening context.
///
/// The opener registered `method` on `instance`; the started application
/// invokes it once its first matching context listener is added and gets
/// the context back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenContextRequest {
    pub instance: InstanceId,
    pub method: String,
    pub context_type: String,
}

impl OpenContextRequest {
    /// Whether a listener filtered on `context_type` should take the
    /// opening context.
    pub fn matches(&self, context_type: Option<&str>) -> bool {
        context_type.map_or(true, |t| t == self.context_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub open_context: Option<OpenContextRequest>,
}

/// Starts and stops application instances.
///
/// Implementations create the instance (connecting it to the registry)
/// before `start` returns.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn start(
        &self,
        app: &ApplicationDefinition,
        context: Option<Value>,
        options: LaunchOptions,
    ) -> Result<Instance>;

    async fn stop(&self, instance: InstanceId) -> Result<()>;
}

/// A launcher for agents that never start applications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLauncher;

#[async_trait]
impl Launcher for NoLauncher {
    async fn start(
        &self,
        app: &ApplicationDefinition,
        _context: Option<Value>,
        _options: LaunchOptions,
    ) -> Result<Instance> {
        Err(Error::state(format!(
            "no launcher configured to start '{}'",
            app.name
        )))
    }

    async fn stop(&self, instance: InstanceId) -> Result<()> {
        Err(Error::state(format!(
            "no launcher configured to stop {}",
            instance
        )))
    }
}
