//! Logging initialisation.
//!
//! Every crate in the workspace logs through `tracing`; this installs the
//! subscriber that prints it.

use std::collections::BTreeMap;

use interop_transport::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "INTEROP_LOG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    pub level: String,
    pub format: LogFormat,
    /// Enable colored output (text format only)
    pub color: bool,
    /// Module-specific log levels, e.g. `{"interop_channels": "debug"}`
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            color: true,
            modules: BTreeMap::new(),
        }
    }
}

/// Install a global `tracing` subscriber writing to stderr.
///
/// `INTEROP_LOG`, when set, replaces the configured filter entirely.
///
/// # Errors
///
/// * `Config` - an invalid module directive, or a subscriber is already
///   installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => build_filter(config)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|e| Error::config(format!("cannot install log subscriber: {}", e)))
}

/// The filter described by `config`, ignoring the environment.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }
    let mut filter = EnvFilter::new(&config.level);
    for (module, level) in &config.modules {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| Error::config(format!("invalid log directive '{}': {}", directive, e)))?,
        );
    }
    Ok(filter)
}
