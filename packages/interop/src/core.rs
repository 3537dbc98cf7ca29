//! Assembly of the shared pieces.

use std::sync::Arc;

use interop_context_store::ContextStore;
use interop_intents::AppDirectory;
use interop_registry::Registry;
use interop_transport::Bus;
use tracing::info;

use crate::agent::AgentBuilder;
use crate::config::InteropConfig;

/// The shared half of the interop core: one bus, one registry, one context
/// store and one app directory, built once and handed to every agent.
///
/// Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct Core {
    registry: Registry,
    store: ContextStore,
    directory: Arc<AppDirectory>,
    config: Arc<InteropConfig>,
}

impl Core {
    pub fn new(config: InteropConfig, directory: AppDirectory) -> Self {
        info!(applications = directory.len(), "interop core started");
        Self {
            registry: Registry::new(Bus::new()),
            store: ContextStore::new(),
            directory: Arc::new(directory),
            config: Arc::new(config),
        }
    }

    pub fn bus(&self) -> &Bus {
        self.registry.bus()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn directory(&self) -> &Arc<AppDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &InteropConfig {
        &self.config
    }

    /// Start building an agent for an instance of `application`.
    pub fn agent(&self, application: &str) -> AgentBuilder {
        AgentBuilder::new(self.clone(), application)
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("instances", &self.registry.instances().len())
            .field("applications", &self.directory.len())
            .finish()
    }
}
