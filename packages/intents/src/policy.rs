//! Choosing between several intent handlers.

use async_trait::async_trait;
use interop_transport::{Error, Instance, Result};
use serde_json::Value;

/// One way an intent could be handled: a live instance already listening,
/// or (when `instance` is `None`) an application that would be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentCandidate {
    pub intent: String,
    pub app: String,
    pub instance: Option<Instance>,
}

impl std::fmt::Display for IntentCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}/{} ({})", self.app, self.intent, instance.id),
            None => write!(f, "{}/{} (not running)", self.app, self.intent),
        }
    }
}

/// Picks one candidate when a raise without a target matches several.
///
/// Candidates arrive in registration order (live instances) or catalog
/// order (applications to start). There is no default policy.
#[async_trait]
pub trait ResolutionPolicy: Send + Sync {
    async fn select(&self, context: &Value, candidates: &[IntentCandidate]) -> Result<IntentCandidate>;
}

/// Refuse to choose: an ambiguous raise fails with `Conflict`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAmbiguous;

#[async_trait]
impl ResolutionPolicy for RejectAmbiguous {
    async fn select(&self, _context: &Value, candidates: &[IntentCandidate]) -> Result<IntentCandidate> {
        match candidates {
            [] => Err(Error::not_found("no candidates")),
            [only] => Ok(only.clone()),
            many => Err(Error::conflict(format!(
                "ambiguous intent resolution: {}",
                many.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Take the earliest candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstRegistered;

#[async_trait]
impl ResolutionPolicy for FirstRegistered {
    async fn select(&self, _context: &Value, candidates: &[IntentCandidate]) -> Result<IntentCandidate> {
        candidates
            .first()
            .cloned()
            .ok_or_else(|| Error::not_found("no candidates"))
    }
}
