//! # Interop
//!
//! The interop core assembled: a [`Core`] owns the shared bus, registry,
//! context store and app directory; each running application instance is
//! an [`Agent`] with its own transport endpoint, [`Channels`] service and
//! [`Intents`] service.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use interop::{AppDirectory, Core, InteropConfig, RejectAmbiguous};
//! use serde_json::json;
//!
//! let config = InteropConfig::from_file("interop.json")?;
//! interop::logging::init_logging(&config.logging)?;
//!
//! let core = Core::new(config, AppDirectory::from_file("apps.json")?);
//! let agent = core.agent("blotter").policy(Arc::new(RejectAmbiguous)).connect()?;
//!
//! agent.channels().join_user_channel("red")?;
//! agent.channels().broadcast(json!({"type": "fdc3.instrument", "id": {"ticker": "AAPL"}}))?;
//! ```

mod agent;
pub mod config;
mod core;
pub mod logging;

pub use agent::{Agent, AgentBuilder};
pub use config::InteropConfig;
pub use core::Core;
pub use logging::{init_logging, LogFormat, LoggingConfig};

pub use interop_channels::{
    Channel, ChannelEvent, ChannelKind, Channels, ChannelsConfig, ContextListener,
    SystemChannelDefinition, UserChannelListener,
};
pub use interop_context_store::{ContextStore, Snapshot};
pub use interop_intents::{
    AppDetails, AppDirectory, AppIdentifier, AppIntent, AppMetadata, ApplicationDefinition,
    FirstRegistered, IntentCandidate, IntentDefinition, IntentHandlerResult, IntentListener,
    IntentMetadata, IntentResolution, IntentResult, Intents, IntentsBuilder, IntentsConfig,
    LaunchOptions, Launcher, NoLauncher, OpenContextRequest, RejectAmbiguous, ResolutionPolicy,
};
pub use interop_registry::{Registry, RegistryEvent};
pub use interop_transport::{
    Bus, Error, ErrorKind, Instance, InstanceId, Result, Subscription, Target, Transport,
};
