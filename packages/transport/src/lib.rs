//! # Interop Transport
//!
//! The lowest layer of the interop core: an asynchronous pub/sub and RPC
//! substrate connecting isolated instances.
//!
//! ## Core Concepts
//!
//! ### Instances
//!
//! An [`Instance`] is one running execution context of an application. It
//! talks to the world only through its own [`Transport`] endpoint.
//!
//! ### The Bus
//!
//! The [`Bus`] is the routing hub. It keeps the method table (which instance
//! serves which method, in registration order) and the topic subscriptions,
//! and emits [`DiscoveryEvent`]s as methods come and go.
//!
//! ### Delivery
//!
//! Each subscription owns a FIFO [`Mailbox`] drained by one task, so
//! messages from a single sender arrive in the order they were sent. There
//! is no ordering guarantee across senders.
//!
//! ### Cancellation
//!
//! Every registration returns a capability ([`Subscription`] or
//! [`MethodRegistration`]) whose unsubscribe/unregister is idempotent and
//! safe to call after the underlying resource is gone.
//!
//! ## Example
//!
//! ```ignore
//! use interop_transport::{Bus, Instance, Target};
//! use serde_json::json;
//!
//! let bus = Bus::new();
//! let server = bus.endpoint(Instance::new("calculator"));
//! let client = bus.endpoint(Instance::new("client"));
//!
//! server.register("double", |inv| async move {
//!     Ok(json!(inv.args.as_i64().unwrap_or(0) * 2))
//! })?;
//!
//! let four = client.invoke("double", json!(2), Target::Best).await?;
//! ```

pub mod bus;
pub mod error;
pub mod instance;
pub mod method;
pub mod subscription;
pub mod transport;

pub use bus::{Bus, DiscoveryWatch};
pub use error::{Error, ErrorKind, Result};
pub use instance::{Instance, InstanceId};
pub use method::{method_handler, DiscoveryEvent, Invocation, Message, MethodHandler, Target};
pub use subscription::{Mailbox, Subscription};
pub use transport::{MethodRegistration, Transport};
