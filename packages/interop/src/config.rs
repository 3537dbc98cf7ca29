//! Interop core configuration.

use std::path::Path;

use interop_channels::{ChannelsConfig, SystemChannelDefinition};
use interop_intents::IntentsConfig;
use interop_transport::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;

/// Configuration for a whole [`Core`](crate::Core).
///
/// Every field has a default, so `{}` is a valid configuration.
///
/// ```json
/// {
///   "intentResolutionTimeoutMs": 15000,
///   "openContextTimeoutMs": 10000,
///   "systemChannels": [{"id": "red", "name": "Red", "color": "#e53935"}],
///   "logging": {"level": "debug", "format": "json"}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteropConfig {
    #[serde(default = "default_intent_resolution_timeout_ms")]
    pub intent_resolution_timeout_ms: u64,
    #[serde(default = "default_open_context_timeout_ms")]
    pub open_context_timeout_ms: u64,
    #[serde(default = "default_system_channels")]
    pub system_channels: Vec<SystemChannelDefinition>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_intent_resolution_timeout_ms() -> u64 {
    IntentsConfig::default().intent_resolution_timeout_ms
}

fn default_open_context_timeout_ms() -> u64 {
    IntentsConfig::default().open_context_timeout_ms
}

fn default_system_channels() -> Vec<SystemChannelDefinition> {
    ChannelsConfig::default().system_channels
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            intent_resolution_timeout_ms: default_intent_resolution_timeout_ms(),
            open_context_timeout_ms: default_open_context_timeout_ms(),
            system_channels: default_system_channels(),
            logging: LoggingConfig::default(),
        }
    }
}

impl InteropConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// The channel layer's slice.
    pub fn channels(&self) -> ChannelsConfig {
        ChannelsConfig {
            system_channels: self.system_channels.clone(),
        }
    }

    /// The intents engine's slice.
    pub fn intents(&self) -> IntentsConfig {
        IntentsConfig {
            intent_resolution_timeout_ms: self.intent_resolution_timeout_ms,
            open_context_timeout_ms: self.open_context_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(
            InteropConfig::from_json_str("{}").unwrap(),
            InteropConfig::default()
        );
    }

    #[test]
    fn slices() {
        let config = InteropConfig::from_json_str(
            r##"{
                "intentResolutionTimeoutMs": 500,
                "systemChannels": [{"id": "only", "name": "Only", "color": "#fff"}]
            }"##,
        )
        .unwrap();
        assert_eq!(config.intents().intent_resolution_timeout_ms, 500);
        assert_eq!(
            config.intents().open_context_timeout_ms,
            IntentsConfig::default().open_context_timeout_ms
        );
        assert_eq!(config.channels().system_channels.len(), 1);
    }

    #[test]
    fn rejects_malformed() {
        let err = InteropConfig::from_json_str(r#"{"openContextTimeoutMs": "soon"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"logging": {{"level": "debug"}}}}"#).unwrap();
        let config = InteropConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");

        assert!(matches!(
            InteropConfig::from_file("/nonexistent/interop.json").unwrap_err(),
            Error::Config(_)
        ));
    }
}
