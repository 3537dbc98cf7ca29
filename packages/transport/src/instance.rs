//! Instance identity.
//!
//! An instance is one running, uniquely addressable execution context of an
//! application. Instances share no memory; everything they exchange goes
//! through the [`Bus`](crate::Bus).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Create a new random InstanceId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an InstanceId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A live instance: its id and the name of the application it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    pub application: String,
}

impl Instance {
    /// Create a new instance of `application` with a fresh id.
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            id: InstanceId::new(),
            application: application.into(),
        }
    }
}
