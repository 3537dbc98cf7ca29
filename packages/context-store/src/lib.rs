//! # Interop Context Store
//!
//! Named JSON documents shared by every instance:
//!
//! - `set` replaces a document, `update` merges its top-level keys
//! - `get` returns an owned copy
//! - `subscribe` delivers the full snapshot after every mutation
//! - `transact` and `claim` give atomic read-modify-write and
//!   compare-and-set claim tickets on top of the same per-document ordering
//!
//! The store is the single shared mutable resource of the interop core.
//! Channels keep their state here and nowhere else.

mod store;
pub mod value_utils;

pub use store::{ContextStore, Snapshot};

// Re-export transport types for convenience
pub use interop_transport::{Error, Result, Subscription};
