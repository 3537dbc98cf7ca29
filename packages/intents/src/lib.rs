//! # Interop Intents
//!
//! Named capabilities that applications declare in the [`AppDirectory`] and
//! serve at runtime through intent listeners.
//!
//! ## Flow
//!
//! 1. **Discovery**: [`AppDirectory::find_intent`] and
//!    [`AppDirectory::find_intents_by_context`] answer from the catalog
//!    alone.
//! 2. **Listening**: [`Intents::add_intent_listener`] claims the
//!    `(intent, instance)` pair in the context store and serves the
//!    intent's interop method.
//! 3. **Raising**: [`Intents::raise_intent`] picks a live listener (asking
//!    the [`ResolutionPolicy`] when several match) and returns an
//!    [`IntentResolution`] straight away. [`Intents::raise_intent_for_context`]
//!    can also cold-start an application through the [`Launcher`].
//! 4. **Results**: [`IntentResolution::get_result`] waits for the handler
//!    and turns its answer into a context, a channel (claiming private
//!    ones) or nothing.
//!
//! [`Intents::open`] starts an application and hands it a context through
//! a temporary interop method on the opener.

mod config;
mod directory;
mod engine;
mod finder;
mod launcher;
mod listener;
mod policy;
mod resolution;

pub use config::IntentsConfig;
pub use directory::{AppDetails, AppDirectory, AppMetadata, ApplicationDefinition, IntentDefinition};
pub use engine::{Intents, IntentsBuilder};
pub use finder::{AppIntent, IntentMetadata};
pub use launcher::{LaunchOptions, Launcher, NoLauncher, OpenContextRequest};
pub use listener::{intent_method, IntentHandlerResult, IntentListener};
pub use policy::{FirstRegistered, IntentCandidate, RejectAmbiguous, ResolutionPolicy};
pub use resolution::{AppIdentifier, IntentResolution, IntentResult};

// Re-export transport types for convenience
pub use interop_transport::{Error, Instance, InstanceId, Result};
