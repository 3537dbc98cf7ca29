//! Intent discovery over the app directory.

use interop_channels::validate_context;
use interop_transport::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::directory::{AppDirectory, AppMetadata, ApplicationDefinition, IntentDefinition};

/// Name and display name of an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMetadata {
    pub name: String,
    pub display_name: String,
}

/// An intent and the applications that can handle it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIntent {
    pub intent: IntentMetadata,
    pub apps: Vec<AppMetadata>,
}

/// Whether a declared result type satisfies a query. A query of exactly
/// `"channel"` also matches typed channels such as `"channel<fdc3.contact>"`.
pub(crate) fn result_type_matches(declared: Option<&str>, query: &str) -> bool {
    match declared {
        Some(declared) => declared == query || (query == "channel" && declared.starts_with("channel")),
        None => false,
    }
}

fn validate_result_type(result_type: Option<&str>) -> Result<()> {
    match result_type {
        Some("") => Err(Error::validation("result type must not be empty")),
        _ => Ok(()),
    }
}

fn entry_matches(
    intent: &IntentDefinition,
    context_type: Option<&str>,
    result_type: Option<&str>,
) -> bool {
    context_type.map_or(true, |t| intent.accepts(t))
        && result_type.map_or(true, |r| result_type_matches(intent.result_type.as_deref(), r))
}

impl AppDirectory {
    /// Every `(application, intent)` entry accepting `context_type` and
    /// returning `result_type`, in catalog order.
    pub fn matching(
        &self,
        context_type: Option<&str>,
        result_type: Option<&str>,
    ) -> Vec<(&ApplicationDefinition, &IntentDefinition)> {
        self.applications()
            .iter()
            .flat_map(|app| app.intents.iter().map(move |intent| (app, intent)))
            .filter(|(_, intent)| entry_matches(intent, context_type, result_type))
            .collect()
    }

    /// Find the applications that handle intent `name`.
    ///
    /// With a `context`, only entries declaring its type are kept; entries
    /// that declare no contexts at all are dropped. With a `result_type`,
    /// only entries returning it are kept.
    ///
    /// # Errors
    ///
    /// * `Validation` - empty `name`, malformed `context` or empty
    ///   `result_type`.
    /// * `NotFound` - no entry is named `name`, or none survives the filters.
    pub fn find_intent(
        &self,
        name: &str,
        context: Option<&Value>,
        result_type: Option<&str>,
    ) -> Result<AppIntent> {
        if name.is_empty() {
            return Err(Error::validation("intent name must not be empty"));
        }
        let context_type = context.map(validate_context).transpose()?;
        validate_result_type(result_type)?;

        let named: Vec<_> = self
            .applications()
            .iter()
            .flat_map(|app| app.intents.iter().map(move |intent| (app, intent)))
            .filter(|(_, intent)| intent.name == name)
            .collect();
        if named.is_empty() {
            return Err(Error::not_found(format!("no application handles intent '{}'", name)));
        }

        let found: Vec<_> = named
            .into_iter()
            .filter(|(_, intent)| entry_matches(intent, context_type, result_type))
            .collect();
        group(name, &found).ok_or_else(|| {
            Error::not_found(format!(
                "no application handles intent '{}' for the given context and result type",
                name
            ))
        })
    }

    /// Find every intent that accepts `context`, grouped by intent name in
    /// catalog order.
    ///
    /// # Errors
    ///
    /// * `Validation` - malformed `context` or empty `result_type`.
    /// * `NotFound` - nothing matches.
    pub fn find_intents_by_context(
        &self,
        context: &Value,
        result_type: Option<&str>,
    ) -> Result<Vec<AppIntent>> {
        let context_type = validate_context(context)?;
        validate_result_type(result_type)?;

        let found = self.matching(Some(context_type), result_type);
        let mut names: Vec<&str> = Vec::new();
        for (_, intent) in &found {
            if !names.contains(&intent.name.as_str()) {
                names.push(&intent.name);
            }
        }

        let intents: Vec<AppIntent> = names
            .into_iter()
            .filter_map(|name| {
                let entries: Vec<_> = found
                    .iter()
                    .filter(|(_, intent)| intent.name == name)
                    .copied()
                    .collect();
                group(name, &entries)
            })
            .collect();
        if intents.is_empty() {
            return Err(Error::not_found(format!(
                "no intent accepts context type '{}'",
                context_type
            )));
        }
        Ok(intents)
    }
}

fn group(name: &str, entries: &[(&ApplicationDefinition, &IntentDefinition)]) -> Option<AppIntent> {
    if entries.is_empty() {
        return None;
    }
    let display_name = entries
        .iter()
        .find_map(|(_, intent)| intent.display_name.clone())
        .unwrap_or_else(|| name.to_string());
    let mut apps: Vec<AppMetadata> = Vec::new();
    for (app, _) in entries {
        if !apps.iter().any(|a| a.name == app.name) {
            apps.push(app.metadata());
        }
    }
    Some(AppIntent {
        intent: IntentMetadata {
            name: name.to_string(),
            display_name,
        },
        apps,
    })
}
