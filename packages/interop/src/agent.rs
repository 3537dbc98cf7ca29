//! Agents: one instance's view of the interop core.

use std::sync::Arc;

use interop_channels::Channels;
use interop_intents::{Intents, Launcher, OpenContextRequest, ResolutionPolicy};
use interop_transport::{Error, Instance, Result, Transport};
use tracing::info;

use crate::core::Core;

/// Builds an [`Agent`]. A resolution policy is required.
pub struct AgentBuilder {
    core: Core,
    application: String,
    launcher: Option<Arc<dyn Launcher>>,
    policy: Option<Arc<dyn ResolutionPolicy>>,
    startup: Option<OpenContextRequest>,
}

impl AgentBuilder {
    pub(crate) fn new(core: Core, application: &str) -> Self {
        Self {
            core,
            application: application.to_string(),
            launcher: None,
            policy: None,
            startup: None,
        }
    }

    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn ResolutionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// The opening context request the instance was launched with, if any.
    pub fn startup(mut self, request: Option<OpenContextRequest>) -> Self {
        self.startup = request;
        self
    }

    /// Connect a new instance to the registry and wire up its services.
    pub fn connect(self) -> Result<Agent> {
        let policy = self
            .policy
            .ok_or_else(|| Error::config("an intent resolution policy is required"))?;
        let core = self.core;
        let transport = core.registry().connect(&self.application)?;
        let channels = Channels::new(
            transport.clone(),
            core.registry(),
            core.store().clone(),
            core.config().channels(),
        );

        let mut intents = Intents::builder(
            transport.clone(),
            core.registry().clone(),
            core.store().clone(),
            channels.clone(),
            core.directory().clone(),
        )
        .policy(policy)
        .config(core.config().intents());
        if let Some(launcher) = self.launcher {
            intents = intents.launcher(launcher);
        }
        if let Some(request) = self.startup {
            intents = intents.with_startup(request);
        }
        let intents = match intents.build() {
            Ok(intents) => intents,
            Err(e) => {
                core.registry().disconnect(transport.instance().id);
                return Err(e);
            }
        };

        info!(application = %self.application, instance = %transport.instance().id, "agent connected");
        Ok(Agent {
            core,
            transport,
            channels,
            intents,
        })
    }
}

/// One connected instance with its channel and intent services.
///
/// Cloning is cheap; clones are the same instance.
#[derive(Clone)]
pub struct Agent {
    core: Core,
    transport: Transport,
    channels: Channels,
    intents: Intents,
}

impl Agent {
    pub fn instance(&self) -> &Instance {
        self.transport.instance()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn intents(&self) -> &Intents {
        &self.intents
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Tear the instance down: disconnect its channels, then drop it from
    /// the registry along with every method and subscription it holds.
    /// Returns false if it was already gone.
    pub fn close(&self) -> bool {
        self.channels.disconnect_all();
        let removed = self.core.registry().disconnect(self.instance().id);
        if removed {
            info!(instance = %self.instance().id, "agent closed");
        }
        removed
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("instance", self.instance())
            .finish()
    }
}
