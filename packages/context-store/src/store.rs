//! The context store.

use std::collections::HashMap;
use std::sync::Arc;

use interop_transport::{Error, Mailbox, Result, Subscription};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::value_utils;

/// The full state of a document right after a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub value: Value,
    /// Number of successful mutations applied to the document so far.
    pub version: u64,
}

struct Document {
    value: Value,
    version: u64,
}

struct Subscriber {
    id: u64,
    mailbox: Mailbox<Snapshot>,
}

#[derive(Default)]
struct StoreState {
    documents: HashMap<String, Document>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_id: u64,
}

impl StoreState {
    /// Replace a document's value, bump its version and enqueue the new
    /// snapshot for every subscriber of that name.
    fn commit(&mut self, name: &str, value: Value) -> Snapshot {
        let document = self
            .documents
            .entry(name.to_string())
            .or_insert(Document {
                value: Value::Null,
                version: 0,
            });
        document.value = value;
        document.version += 1;

        let snapshot = Snapshot {
            name: name.to_string(),
            value: document.value.clone(),
            version: document.version,
        };
        if let Some(subscribers) = self.subscribers.get_mut(name) {
            subscribers.retain(|s| s.mailbox.deliver(snapshot.clone()));
        }
        trace!(document = name, version = snapshot.version, "committed");
        snapshot
    }

    fn snapshot(&self, name: &str) -> Option<Snapshot> {
        self.documents.get(name).map(|d| Snapshot {
            name: name.to_string(),
            value: d.value.clone(),
            version: d.version,
        })
    }
}

/// Replicated named JSON documents.
///
/// Every value crossing the store boundary is an owned copy: what a caller
/// passes in can be mutated afterwards without affecting the store, and what
/// it reads out is its own.
///
/// Mutations are applied one at a time under the store lock. Each one
/// enqueues its snapshot to every subscriber before the lock is released,
/// so subscribers see the same total order the store applied, with one
/// notification per mutation.
///
/// # Example
///
/// ```ignore
/// let store = ContextStore::new();
/// store.update("instrument", json!({"ric": "VOD.L"}))?;
/// store.update("instrument", json!({"bid": 101.5}))?;
///
/// assert_eq!(
///     store.get("instrument"),
///     Some(json!({"ric": "VOD.L", "bid": 101.5}))
/// );
/// ```
#[derive(Clone, Default)]
pub struct ContextStore {
    state: Arc<Mutex<StoreState>>,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a document. Creates it if missing. Returns the new version.
    pub fn set(&self, name: &str, value: Value) -> Result<u64> {
        validate_name(name)?;
        let snapshot = self.state.lock().commit(name, value);
        debug!(document = name, version = snapshot.version, "set");
        Ok(snapshot.version)
    }

    /// Merge the top-level keys of `partial` into a document. Creates it if
    /// missing. Returns the new version.
    ///
    /// # Errors
    ///
    /// * `Validation` - `partial` is not an object.
    pub fn update(&self, name: &str, partial: Value) -> Result<u64> {
        validate_name(name)?;
        let mut state = self.state.lock();
        let merged =
            value_utils::merge_top_level(state.documents.get(name).map(|d| &d.value), &partial)?;
        let snapshot = state.commit(name, merged);
        debug!(document = name, version = snapshot.version, "update");
        Ok(snapshot.version)
    }

    /// A copy of the current value, or `None` if the document does not
    /// exist.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.state
            .lock()
            .documents
            .get(name)
            .map(|d| d.value.clone())
    }

    /// A copy of the current value with its version.
    pub fn snapshot(&self, name: &str) -> Option<Snapshot> {
        self.state.lock().snapshot(name)
    }

    /// Names of all existing documents.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().documents.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete a document. Subscribers stay registered and are not notified;
    /// a later write recreates the document starting from version 1.
    pub fn remove(&self, name: &str) -> Option<Value> {
        let removed = self.state.lock().documents.remove(name).map(|d| d.value);
        if removed.is_some() {
            debug!(document = name, "removed");
        }
        removed
    }

    /// Call `handler` with the full snapshot after every successful
    /// mutation of `name`.
    pub fn subscribe<F>(&self, name: &str, handler: F) -> Result<Subscription>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        self.add_subscriber(name, Mailbox::spawn(handler), false)
    }

    /// Like [`subscribe`](Self::subscribe), but the current snapshot (if the
    /// document exists) is delivered first. Registration and the initial
    /// snapshot are atomic with respect to mutations, so nothing is missed
    /// or seen twice.
    pub fn subscribe_with_current<F>(&self, name: &str, handler: F) -> Result<Subscription>
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        self.add_subscriber(name, Mailbox::spawn(handler), true)
    }

    fn add_subscriber(
        &self,
        name: &str,
        mailbox: Mailbox<Snapshot>,
        replay: bool,
    ) -> Result<Subscription> {
        validate_name(name)?;
        let mut state = self.state.lock();
        if replay {
            if let Some(current) = state.snapshot(name) {
                mailbox.deliver(current);
            }
        }
        state.next_id += 1;
        let id = state.next_id;
        state
            .subscribers
            .entry(name.to_string())
            .or_default()
            .push(Subscriber { id, mailbox });
        drop(state);

        let weak = Arc::downgrade(&self.state);
        let name = name.to_string();
        Ok(Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock();
                if let Some(subscribers) = state.subscribers.get_mut(&name) {
                    subscribers.retain(|s| s.id != id);
                    if subscribers.is_empty() {
                        state.subscribers.remove(&name);
                    }
                }
            }
        }))
    }

    /// Atomic read-modify-write.
    ///
    /// `f` sees the current value (if any) and returns:
    /// * `Ok(Some(value))` - the document is replaced and subscribers are
    ///   notified. The new snapshot is returned.
    /// * `Ok(None)` - nothing changes and nobody is notified.
    /// * `Err(e)` - nothing changes; the error is returned.
    ///
    /// `f` runs while the store is locked and must not call back into the
    /// store.
    pub fn transact<F>(&self, name: &str, f: F) -> Result<Option<Snapshot>>
    where
        F: FnOnce(Option<&Value>) -> Result<Option<Value>>,
    {
        validate_name(name)?;
        let mut state = self.state.lock();
        let next = f(state.documents.get(name).map(|d| &d.value))?;
        Ok(next.map(|value| state.commit(name, value)))
    }

    /// Claim a top-level slot of a document for `claimant`.
    ///
    /// A compare-and-set: succeeds when the slot is empty (missing or null)
    /// or already held by `claimant`. The document is created if missing.
    ///
    /// # Errors
    ///
    /// * `Conflict` - someone else holds the slot.
    pub fn claim(&self, name: &str, slot: &str, claimant: &str) -> Result<()> {
        self.transact(name, |current| {
            match value_utils::slot_holder(current, slot) {
                Some(holder) if holder == claimant => Ok(None),
                Some(holder) => Err(Error::conflict(format!(
                    "slot '{}' of '{}' is already claimed by {}",
                    slot, name, holder
                ))),
                None => {
                    let mut map = value_utils::as_object(current);
                    map.insert(slot.to_string(), Value::String(claimant.to_string()));
                    Ok(Some(Value::Object(map)))
                }
            }
        })
        .inspect_err(|e| debug!(document = name, slot, error = %e, "claim rejected"))?;
        Ok(())
    }

    /// Release a slot held by `claimant`. Returns false if the slot was not
    /// held by `claimant`.
    pub fn release(&self, name: &str, slot: &str, claimant: &str) -> Result<bool> {
        let changed = self.transact(name, |current| {
            if value_utils::slot_holder(current, slot) != Some(claimant) {
                return Ok(None);
            }
            let mut map = value_utils::as_object(current);
            map.remove(slot);
            Ok(Some(Value::Object(map)))
        })?;
        Ok(changed.is_some())
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("documents", &self.state.lock().documents.len())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("document name must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    fn collector(
        store: &ContextStore,
        name: &str,
    ) -> (Subscription, mpsc::UnboundedReceiver<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = store
            .subscribe(name, move |snapshot| {
                let _ = tx.send(snapshot);
            })
            .unwrap();
        (sub, rx)
    }

    #[test]
    fn get_missing_is_none() {
        let store = ContextStore::new();
        assert_eq!(store.get("nothing"), None);
        assert!(store.names().is_empty());
    }

    #[test]
    fn set_then_get() {
        let store = ContextStore::new();
        assert_eq!(store.set("doc", json!({"a": 1})).unwrap(), 1);
        assert_eq!(store.get("doc"), Some(json!({"a": 1})));
        assert_eq!(store.set("doc", json!({"b": 2})).unwrap(), 2);
        assert_eq!(store.get("doc"), Some(json!({"b": 2})));
    }

    #[test]
    fn writes_and_reads_are_isolated_copies() {
        let store = ContextStore::new();

        let mut written = json!({"a": {"deep": 1}});
        store.set("doc", written.clone()).unwrap();
        written["a"]["deep"] = json!(99);
        assert_eq!(store.get("doc"), Some(json!({"a": {"deep": 1}})));

        let mut partial = json!({"b": [1, 2]});
        store.update("doc", partial.clone()).unwrap();
        partial["b"][0] = json!(42);

        let mut read = store.get("doc").unwrap();
        read["a"]["deep"] = json!(7);
        assert_eq!(
            store.get("doc"),
            Some(json!({"a": {"deep": 1}, "b": [1, 2]}))
        );
    }

    #[test]
    fn update_creates_and_merges() {
        let store = ContextStore::new();
        store.update("doc", json!({"a": 1})).unwrap();
        store.update("doc", json!({"b": 2})).unwrap();
        store.update("doc", json!({"a": 3})).unwrap();
        assert_eq!(store.get("doc"), Some(json!({"a": 3, "b": 2})));
    }

    #[test]
    fn update_rejects_non_object_and_leaves_document_alone() {
        let store = ContextStore::new();
        store.set("doc", json!({"a": 1})).unwrap();
        let err = store.update("doc", json!("nope")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.snapshot("doc").unwrap().version, 1);
    }

    #[test]
    fn empty_name_is_rejected() {
        let store = ContextStore::new();
        assert!(matches!(
            store.set("", json!(1)),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_disjoint_updates_both_apply() {
        for _ in 0..50 {
            let store = ContextStore::new();
            let a = {
                let store = store.clone();
                tokio::spawn(async move { store.update("doc", json!({"a": 1})) })
            };
            let b = {
                let store = store.clone();
                tokio::spawn(async move { store.update("doc", json!({"b": 2})) })
            };
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();
            assert_eq!(store.get("doc"), Some(json!({"a": 1, "b": 2})));
        }
    }

    #[tokio::test]
    async fn one_notification_per_mutation_with_full_snapshot() {
        let store = ContextStore::new();
        let (_sub, mut rx) = collector(&store, "doc");

        store.set("doc", json!({"a": 1})).unwrap();
        store.update("doc", json!({"b": 2})).unwrap();
        store.update("doc", json!({"c": 3})).unwrap();

        let first = recv(&mut rx).await;
        assert_eq!(first.value, json!({"a": 1}));
        assert_eq!(first.version, 1);
        let second = recv(&mut rx).await;
        assert_eq!(second.value, json!({"a": 1, "b": 2}));
        let third = recv(&mut rx).await;
        assert_eq!(third.value, json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(third.version, 3);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribers_only_see_their_document() {
        let store = ContextStore::new();
        let (_sub, mut rx) = collector(&store, "mine");
        store.set("other", json!(1)).unwrap();
        store.set("mine", json!(2)).unwrap();
        assert_eq!(recv(&mut rx).await.value, json!(2));
    }

    #[tokio::test]
    async fn unsubscribe_stops_notifications_and_is_idempotent() {
        let store = ContextStore::new();
        let (sub, mut rx) = collector(&store, "doc");
        store.set("doc", json!(1)).unwrap();
        assert_eq!(recv(&mut rx).await.value, json!(1));

        sub.unsubscribe();
        sub.unsubscribe();
        store.set("doc", json!(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_with_current_replays_existing_snapshot() {
        let store = ContextStore::new();
        store.set("doc", json!({"a": 1})).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = store
            .subscribe_with_current("doc", move |s| {
                let _ = tx.send(s);
            })
            .unwrap();
        store.update("doc", json!({"b": 2})).unwrap();

        assert_eq!(recv(&mut rx).await.version, 1);
        assert_eq!(recv(&mut rx).await.version, 2);
    }

    #[tokio::test]
    async fn subscribe_with_current_on_missing_document_waits() {
        let store = ContextStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = store
            .subscribe_with_current("doc", move |s| {
                let _ = tx.send(s);
            })
            .unwrap();
        store.set("doc", json!(1)).unwrap();
        assert_eq!(recv(&mut rx).await.version, 1);
    }

    #[tokio::test]
    async fn transact_without_change_does_not_notify() {
        let store = ContextStore::new();
        store.set("doc", json!({"n": 1})).unwrap();
        let (_sub, mut rx) = collector(&store, "doc");

        let result = store.transact("doc", |_| Ok(None)).unwrap();
        assert!(result.is_none());

        let err = store
            .transact("doc", |_| Err(Error::state("refused")))
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));

        let snapshot = store
            .transact("doc", |current| {
                let n = current.and_then(|v| v["n"].as_i64()).unwrap_or(0);
                Ok(Some(json!({"n": n + 1})))
            })
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.value, json!({"n": 2}));
        assert_eq!(recv(&mut rx).await.version, 2);
    }

    #[test]
    fn claim_is_compare_and_set() {
        let store = ContextStore::new();
        store.claim("channel", "consumer", "alice").unwrap();
        // Re-claiming by the holder is fine.
        store.claim("channel", "consumer", "alice").unwrap();

        let err = store.claim("channel", "consumer", "bob").unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.get("channel"), Some(json!({"consumer": "alice"})));
    }

    #[test]
    fn release_frees_the_slot_for_others() {
        let store = ContextStore::new();
        store.claim("listeners", "view", "first").unwrap();
        assert!(!store.release("listeners", "view", "someone-else").unwrap());
        assert!(store.release("listeners", "view", "first").unwrap());
        store.claim("listeners", "view", "second").unwrap();
    }

    #[test]
    fn remove_deletes_and_restarts_versions() {
        let store = ContextStore::new();
        store.set("doc", json!(1)).unwrap();
        store.set("doc", json!(2)).unwrap();
        assert_eq!(store.remove("doc"), Some(json!(2)));
        assert_eq!(store.remove("doc"), None);
        assert_eq!(store.set("doc", json!(3)).unwrap(), 1);
        assert_eq!(store.names(), vec!["doc".to_string()]);
    }
}
