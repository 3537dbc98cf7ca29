//! # Interop Channels
//!
//! Named broadcast channels layered on the context store. A channel's
//! state, including its most recent context per type and the listeners
//! registered on it, lives in one store document; handles only hold what
//! their own party registered.
//!
//! Three kinds of channel:
//!
//! - **System** channels form a fixed, configurable catalog (Red, Green,
//!   ...). An instance joins at most one of them at a time as its *user
//!   channel*.
//! - **App** channels are created by name on first use.
//! - **Private** channels connect exactly two parties: the creator and the
//!   first instance to claim the consumer seat. Either side can watch the
//!   other add and remove listeners and disconnect.

mod channel;
mod channels;
pub mod config;
pub mod context;
pub mod document;
mod event;

pub use channel::{Channel, ChannelKind, ContextListener};
pub use channels::{Channels, UserChannelListener};
pub use config::{ChannelsConfig, SystemChannelDefinition};
pub use context::validate_context;
pub use event::ChannelEvent;

// Re-export transport types for convenience
pub use interop_transport::{Error, Result, Subscription};
