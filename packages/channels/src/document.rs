//! Layout of a channel's backing document.
//!
//! ```text
//! {
//!   "id": "red",
//!   "kind": "system",
//!   "creator": "<instance id>",        // private channels only
//!   "consumer": "<instance id>",       // private channels only, claim slot
//!   "disconnected": { "<instance id>": true },  // private channels only
//!   "latestType": "fdc3.instrument",
//!   "latestSeq": 3,
//!   "contexts": {
//!     "fdc3.instrument": { "seq": 3, "context": {...}, "origin": "<instance id>" }
//!   },
//!   "listeners": [
//!     { "id": "<uuid>", "owner": "<instance id>", "contextType": null }
//!   ]
//! }
//! ```
//!
//! Every broadcast bumps `latestSeq` and stamps the stored entry with it, so
//! a listener can tell a new broadcast from an unrelated mutation (a
//! listener being added, a claim) by comparing sequence numbers.
//!
//! A private channel party that disconnects is recorded under
//! `disconnected` and can never reopen the channel. Once every party is
//! recorded there, the document is deleted.

use interop_context_store::value_utils::as_object;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::ChannelKind;

pub(crate) const CONTEXTS: &str = "contexts";
pub(crate) const LATEST_TYPE: &str = "latestType";
pub(crate) const LATEST_SEQ: &str = "latestSeq";
pub(crate) const LISTENERS: &str = "listeners";
pub(crate) const CREATOR: &str = "creator";
/// The claim slot a private channel's second party takes.
pub(crate) const CONSUMER: &str = "consumer";
pub(crate) const DISCONNECTED: &str = "disconnected";

/// Name of the document backing channel `id` of `kind`.
pub fn document_name(kind: ChannelKind, id: &str) -> String {
    match kind {
        ChannelKind::System => format!("___channel___{}", id),
        ChannelKind::App => format!("___appChannel___{}", id),
        ChannelKind::Private => format!("___privateChannel___{}", id),
    }
}

/// Topic carrying [`ChannelEvent`](crate::ChannelEvent)s for a document.
pub fn event_topic(document: &str) -> String {
    format!("___channelEvents___{}", document)
}

/// A context listener as recorded in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListenerRecord {
    pub id: String,
    pub owner: String,
    pub context_type: Option<String>,
}

/// The seed document for a new channel.
pub(crate) fn initial(kind: ChannelKind, id: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("id".into(), Value::String(id.to_string()));
    map.insert("kind".into(), json!(kind));
    map.insert(CONTEXTS.into(), Value::Object(Map::new()));
    map.insert(LISTENERS.into(), Value::Array(Vec::new()));
    map
}

/// Record a broadcast of `context` (of type `context_type`) by `origin`.
pub(crate) fn with_broadcast(
    current: Option<&Value>,
    context_type: &str,
    context: &Value,
    origin: &str,
) -> Value {
    let mut map = as_object(current);
    let seq = map.get(LATEST_SEQ).and_then(Value::as_u64).unwrap_or(0) + 1;
    let mut contexts = as_object(map.get(CONTEXTS));
    contexts.insert(
        context_type.to_string(),
        json!({"seq": seq, "context": context, "origin": origin}),
    );
    map.insert(CONTEXTS.into(), Value::Object(contexts));
    map.insert(LATEST_TYPE.into(), Value::String(context_type.to_string()));
    map.insert(LATEST_SEQ.into(), json!(seq));
    Value::Object(map)
}

/// The stored entry a listener with `filter` cares about: the entry for
/// that type, or the most recent broadcast when unfiltered.
pub(crate) fn entry<'a>(document: &'a Value, filter: Option<&str>) -> Option<&'a Value> {
    let context_type = match filter {
        Some(t) => t,
        None => document.get(LATEST_TYPE)?.as_str()?,
    };
    document.get(CONTEXTS)?.get(context_type)
}

/// Sequence number and context of a stored entry.
pub(crate) fn entry_parts(entry: &Value) -> Option<(u64, &Value)> {
    Some((entry.get("seq")?.as_u64()?, entry.get("context")?))
}

pub(crate) fn listeners(document: Option<&Value>) -> Vec<ListenerRecord> {
    document
        .and_then(|d| d.get(LISTENERS))
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

pub(crate) fn with_listener(current: Option<&Value>, record: &ListenerRecord) -> Value {
    let mut map = as_object(current);
    let mut list = match map.remove(LISTENERS) {
        Some(Value::Array(list)) => list,
        _ => Vec::new(),
    };
    list.push(json!(record));
    map.insert(LISTENERS.into(), Value::Array(list));
    Value::Object(map)
}

/// Remove listener `id`, or `None` if it is not recorded.
pub(crate) fn without_listener(current: Option<&Value>, id: &str) -> Option<Value> {
    let mut map = as_object(current);
    let Some(Value::Array(mut list)) = map.remove(LISTENERS) else {
        return None;
    };
    let before = list.len();
    list.retain(|l| l.get("id").and_then(Value::as_str) != Some(id));
    if list.len() == before {
        return None;
    }
    map.insert(LISTENERS.into(), Value::Array(list));
    Some(Value::Object(map))
}

/// Whether `party` has disconnected from the private channel.
pub(crate) fn has_disconnected(document: &Value, party: &str) -> bool {
    document
        .get(DISCONNECTED)
        .and_then(|gone| gone.get(party))
        .is_some()
}

/// Record that `party` disconnected, or `None` if there is no document or
/// the party is already recorded.
pub(crate) fn with_disconnected(current: Option<&Value>, party: &str) -> Option<Value> {
    let current = current?;
    if has_disconnected(current, party) {
        return None;
    }
    let mut map = as_object(Some(current));
    let mut gone = as_object(map.get(DISCONNECTED));
    gone.insert(party.to_string(), Value::Bool(true));
    map.insert(DISCONNECTED.into(), Value::Object(gone));
    Some(Value::Object(map))
}

/// Whether the creator and the consumer (if one ever claimed) have both
/// disconnected.
pub(crate) fn abandoned(document: &Value) -> bool {
    [CREATOR, CONSUMER].iter().all(|slot| {
        match document.get(*slot).and_then(Value::as_str) {
            Some(party) => has_disconnected(document, party),
            None => true,
        }
    })
}
