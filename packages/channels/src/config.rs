//! Configuration for the channel layer.

use serde::{Deserialize, Serialize};

/// A system (user) channel in the fixed catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemChannelDefinition {
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display color, as a CSS color string.
    pub color: String,
}

impl SystemChannelDefinition {
    pub fn new(id: &str, name: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
        }
    }
}

/// Configuration for [`Channels`](crate::Channels).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    /// The fixed catalog of system channels.
    #[serde(default = "default_system_channels")]
    pub system_channels: Vec<SystemChannelDefinition>,
}

fn default_system_channels() -> Vec<SystemChannelDefinition> {
    vec![
        SystemChannelDefinition::new("red", "Red", "#e53935"),
        SystemChannelDefinition::new("orange", "Orange", "#fb8c00"),
        SystemChannelDefinition::new("yellow", "Yellow", "#fdd835"),
        SystemChannelDefinition::new("green", "Green", "#43a047"),
        SystemChannelDefinition::new("cyan", "Cyan", "#00acc1"),
        SystemChannelDefinition::new("blue", "Blue", "#1e88e5"),
        SystemChannelDefinition::new("purple", "Purple", "#8e24aa"),
        SystemChannelDefinition::new("pink", "Pink", "#d81b60"),
    ]
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            system_channels: default_system_channels(),
        }
    }
}
