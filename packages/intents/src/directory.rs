//! The application directory.

use std::path::Path;

use interop_transport::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An intent an application declares it can handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Context types the intent accepts. `None` means undeclared, which
    /// never matches a context filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

impl IntentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            contexts: None,
            result_type: None,
        }
    }

    pub fn with_contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts = Some(contexts.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_result_type(mut self, result_type: impl Into<String>) -> Self {
        self.result_type = Some(result_type.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Whether the intent declares `context_type` among its contexts.
    pub fn accepts(&self, context_type: &str) -> bool {
        self.contexts
            .as_ref()
            .is_some_and(|contexts| contexts.iter().any(|c| c == context_type))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDetails {
    #[serde(default)]
    pub url: String,
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub intents: Vec<IntentDefinition>,
    #[serde(default)]
    pub details: AppDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_properties: Option<Value>,
}

impl ApplicationDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            intents: Vec::new(),
            details: AppDetails::default(),
            icon: None,
            custom_properties: None,
        }
    }

    pub fn with_intent(mut self, intent: IntentDefinition) -> Self {
        self.intents.push(intent);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.details.url = url.into();
        self
    }

    pub fn metadata(&self) -> AppMetadata {
        AppMetadata {
            name: self.name.clone(),
            title: self.title.clone(),
            icon: self.icon.clone(),
            url: self.details.url.clone(),
        }
    }
}

/// What callers learn about an application from intent discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub url: String,
}

/// The read-only application catalog.
///
/// Applications keep the order they were loaded in; discovery results
/// follow that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppDirectory {
    applications: Vec<ApplicationDefinition>,
}

impl AppDirectory {
    pub fn new(applications: Vec<ApplicationDefinition>) -> Self {
        Self { applications }
    }

    /// Parse a JSON array of application definitions.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid app directory: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn get(&self, name: &str) -> Option<&ApplicationDefinition> {
        self.applications.iter().find(|app| app.name == name)
    }

    pub fn applications(&self) -> &[ApplicationDefinition] {
        &self.applications
    }

    pub fn metadata(&self, name: &str) -> Option<AppMetadata> {
        self.get(name).map(ApplicationDefinition::metadata)
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}
