//! # Interop Registry
//!
//! Tracks which instances are live, which application each one runs and
//! which methods it serves. Built on [`interop_transport`]: connecting an
//! instance hands back its [`Transport`](interop_transport::Transport)
//! endpoint, and disconnecting it tears down everything it registered on
//! the bus.
//!
//! Method discovery events (`MethodAdded`, `ServerMethodAdded`,
//! `ServerMethodRemoved`) come from the bus; instance lifecycle events come
//! from [`Registry::subscribe`].

mod registry;

pub use registry::{Registry, RegistryEvent};

// Re-export transport types for convenience
pub use interop_transport::{Bus, Error, Instance, InstanceId, Result, Subscription, Target};
