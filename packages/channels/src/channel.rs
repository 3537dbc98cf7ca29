//! Channel handles.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use interop_context_store::{ContextStore, Snapshot};
use interop_transport::{Error, InstanceId, Message, Result, Subscription, Transport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{validate_context, validate_context_type};
use crate::document::{self, ListenerRecord};
use crate::event::ChannelEvent;

/// What sort of channel a handle points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// A member of the fixed user-channel catalog.
    System,
    /// Created by name on first use.
    App,
    /// Exactly two parties: the creator and one claimant.
    Private,
}

type ListenerHook = Arc<dyn Fn(Option<String>) + Send + Sync>;
type DisconnectHook = Arc<dyn Fn() + Send + Sync>;

enum HookKind {
    AddContextListener {
        handler: ListenerHook,
        /// Listener ids already reported to this hook.
        seen: HashSet<String>,
    },
    Unsubscribe(ListenerHook),
    Disconnect(DisconnectHook),
}

struct Hook {
    id: u64,
    kind: HookKind,
}

/// Event hooks share one topic subscription so that the other party's
/// events reach them in the order they were published.
#[derive(Default)]
struct Hooks {
    entries: Vec<Hook>,
    next_id: u64,
    feed: Option<Subscription>,
}

impl Hooks {
    fn push(&mut self, kind: HookKind) -> u64 {
        self.next_id += 1;
        self.entries.push(Hook {
            id: self.next_id,
            kind,
        });
        self.next_id
    }

    fn dispatch(hooks: &Mutex<Hooks>, event: ChannelEvent) {
        match event {
            ChannelEvent::AddContextListener {
                listener_id,
                context_type,
            } => {
                let handlers: Vec<ListenerHook> = hooks
                    .lock()
                    .entries
                    .iter_mut()
                    .filter_map(|hook| match &mut hook.kind {
                        HookKind::AddContextListener { handler, seen } => {
                            if seen.insert(listener_id.clone()) {
                                Some(handler.clone())
                            } else {
                                None
                            }
                        }
                        _ => None,
                    })
                    .collect();
                for handler in handlers {
                    handler(context_type.clone());
                }
            }
            ChannelEvent::Unsubscribe { context_type, .. } => {
                let handlers: Vec<ListenerHook> = hooks
                    .lock()
                    .entries
                    .iter()
                    .filter_map(|hook| match &hook.kind {
                        HookKind::Unsubscribe(handler) => Some(handler.clone()),
                        _ => None,
                    })
                    .collect();
                for handler in handlers {
                    handler(context_type.clone());
                }
            }
            ChannelEvent::Disconnect => {
                let handlers: Vec<DisconnectHook> = hooks
                    .lock()
                    .entries
                    .iter()
                    .filter_map(|hook| match &hook.kind {
                        HookKind::Disconnect(handler) => Some(handler.clone()),
                        _ => None,
                    })
                    .collect();
                for handler in handlers {
                    handler();
                }
            }
        }
    }
}

struct ListenerInner {
    record: ListenerRecord,
    subscription: Subscription,
    active: AtomicBool,
}

struct HandleState {
    connected: bool,
    /// This handle's context listeners, in registration order.
    listeners: Vec<Arc<ListenerInner>>,
}

struct ChannelInner {
    id: String,
    kind: ChannelKind,
    document: String,
    topic: String,
    transport: Transport,
    store: ContextStore,
    state: Mutex<HandleState>,
    hooks: Arc<Mutex<Hooks>>,
}

impl ChannelInner {
    fn me(&self) -> InstanceId {
        self.transport.instance().id
    }

    fn publish(&self, event: &ChannelEvent) {
        match serde_json::to_value(event) {
            Ok(payload) => self.transport.publish(&self.topic, payload),
            Err(e) => warn!(channel = %self.id, error = %e, "failed to encode channel event"),
        }
    }

    /// Tear down one listener: stop deliveries, drop it from the document
    /// and tell the other party. Runs at most once per listener.
    fn release_listener(&self, listener: &ListenerInner) {
        if !listener.active.swap(false, Ordering::SeqCst) {
            return;
        }
        listener.subscription.unsubscribe();
        let id = listener.record.id.as_str();
        if let Err(e) = self
            .store
            .transact(&self.document, |current| Ok(document::without_listener(current, id)))
        {
            warn!(channel = %self.id, listener = id, error = %e, "failed to remove listener record");
        }
        self.publish(&ChannelEvent::Unsubscribe {
            listener_id: listener.record.id.clone(),
            context_type: listener.record.context_type.clone(),
        });
        debug!(channel = %self.id, listener = id, "context listener removed");
    }

    /// Record this party as gone from a private channel, deleting the
    /// document once nobody is left.
    fn record_departure(&self) {
        let me = self.me().to_string();
        let marked = self.store.transact(&self.document, |current| {
            Ok(document::with_disconnected(current, &me))
        });
        match marked {
            Ok(Some(snapshot)) if document::abandoned(&snapshot.value) => {
                self.store.remove(&self.document);
                debug!(channel = %self.id, "private channel removed");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(channel = %self.id, error = %e, "failed to record private channel departure")
            }
        }
    }

    /// Start the event feed if no hook has needed it yet.
    fn ensure_feed(&self, hooks: &mut Hooks) -> Result<()> {
        if hooks.feed.is_some() {
            return Ok(());
        }
        let me = self.me();
        let weak: Weak<Mutex<Hooks>> = Arc::downgrade(&self.hooks);
        let channel = self.id.clone();
        let feed = self.transport.subscribe(&self.topic, move |message: Message| {
            if message.publisher.id == me {
                return;
            }
            let Some(hooks) = weak.upgrade() else {
                return;
            };
            match serde_json::from_value::<ChannelEvent>(message.payload) {
                Ok(event) => Hooks::dispatch(&hooks, event),
                Err(e) => warn!(channel = %channel, error = %e, "malformed channel event"),
            }
        })?;
        hooks.feed = Some(feed);
        Ok(())
    }

    fn hook_subscription(&self, id: u64) -> Subscription {
        let weak = Arc::downgrade(&self.hooks);
        Subscription::new(move || {
            if let Some(hooks) = weak.upgrade() {
                hooks.lock().entries.retain(|hook| hook.id != id);
            }
        })
    }
}

/// A handle on one channel, held by one party.
///
/// Channel state lives in the context store; the handle only tracks the
/// listeners and event hooks it registered. Cloning is cheap; clones share
/// the same handle.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn open(
        kind: ChannelKind,
        id: &str,
        transport: Transport,
        store: ContextStore,
    ) -> Self {
        let document = document::document_name(kind, id);
        let topic = document::event_topic(&document);
        Self {
            inner: Arc::new(ChannelInner {
                id: id.to_string(),
                kind,
                document,
                topic,
                transport,
                store,
                state: Mutex::new(HandleState {
                    connected: true,
                    listeners: Vec::new(),
                }),
                hooks: Arc::new(Mutex::new(Hooks::default())),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    /// Name of the backing document in the context store.
    pub fn document(&self) -> &str {
        &self.inner.document
    }

    /// False once [`disconnect`](Self::disconnect) has run.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::state(format!(
                "channel '{}' is disconnected",
                self.inner.id
            )))
        }
    }

    /// Publish `context` to every matching listener on the channel,
    /// including this party's own.
    ///
    /// The context replaces the stored entry for its type and becomes the
    /// channel's most recent context.
    ///
    /// # Errors
    ///
    /// * `Validation` - `context` has no string `type`.
    /// * `State` - the handle is disconnected.
    pub fn broadcast(&self, context: Value) -> Result<()> {
        let context_type = validate_context(&context)?.to_string();
        self.ensure_connected()?;
        let origin = self.inner.me().to_string();
        self.inner.store.transact(&self.inner.document, |current| {
            Ok(Some(document::with_broadcast(
                current,
                &context_type,
                &context,
                &origin,
            )))
        })?;
        debug!(channel = %self.inner.id, context_type = %context_type, "broadcast");
        Ok(())
    }

    /// The stored context of `context_type`, or the most recent context of
    /// any type.
    pub fn get_current_context(&self, context_type: Option<&str>) -> Result<Option<Value>> {
        validate_context_type(context_type)?;
        Ok(self
            .inner
            .store
            .get(&self.inner.document)
            .and_then(|doc| {
                document::entry(&doc, context_type)
                    .and_then(document::entry_parts)
                    .map(|(_, context)| context.clone())
            }))
    }

    /// Call `handler` with every context broadcast on the channel that
    /// matches `context_type` (all types when `None`), in broadcast order.
    ///
    /// If a matching context is already stored, it is delivered first.
    ///
    /// # Errors
    ///
    /// * `Validation` - empty `context_type`.
    /// * `State` - the handle is disconnected.
    pub fn add_context_listener<F>(
        &self,
        context_type: Option<&str>,
        mut handler: F,
    ) -> Result<ContextListener>
    where
        F: FnMut(Value) + Send + 'static,
    {
        validate_context_type(context_type)?;
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if !state.connected {
            return Err(Error::state(format!(
                "channel '{}' is disconnected",
                inner.id
            )));
        }

        let record = ListenerRecord {
            id: Uuid::new_v4().to_string(),
            owner: inner.me().to_string(),
            context_type: context_type.map(str::to_string),
        };

        let filter = record.context_type.clone();
        let mut last_seq = 0;
        let subscription =
            inner
                .store
                .subscribe_with_current(&inner.document, move |snapshot: Snapshot| {
                    let Some((seq, context)) = document::entry(&snapshot.value, filter.as_deref())
                        .and_then(document::entry_parts)
                    else {
                        return;
                    };
                    if seq > last_seq {
                        last_seq = seq;
                        handler(context.clone());
                    }
                })?;

        if let Err(e) = inner.store.transact(&inner.document, |current| {
            Ok(Some(document::with_listener(current, &record)))
        }) {
            subscription.unsubscribe();
            return Err(e);
        }

        inner.publish(&ChannelEvent::AddContextListener {
            listener_id: record.id.clone(),
            context_type: record.context_type.clone(),
        });
        debug!(channel = %inner.id, listener = %record.id, "context listener added");

        let listener = Arc::new(ListenerInner {
            record,
            subscription,
            active: AtomicBool::new(true),
        });
        state.listeners.push(listener.clone());
        Ok(ContextListener {
            channel: inner.clone(),
            inner: listener,
        })
    }

    /// Call `handler` with the context type each time the other party adds
    /// a context listener. Listeners the other party already has are
    /// reported immediately; each listener is reported once.
    pub fn on_add_context_listener<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let handler: ListenerHook = Arc::new(handler);
        let me = self.inner.me().to_string();
        let (id, existing) = {
            let mut hooks = self.inner.hooks.lock();
            self.inner.ensure_feed(&mut hooks)?;
            let current = self.inner.store.get(&self.inner.document);
            let mut seen = HashSet::new();
            let existing: Vec<Option<String>> = document::listeners(current.as_ref())
                .into_iter()
                .filter(|record| record.owner != me && seen.insert(record.id.clone()))
                .map(|record| record.context_type)
                .collect();
            let id = hooks.push(HookKind::AddContextListener {
                handler: handler.clone(),
                seen,
            });
            (id, existing)
        };
        for context_type in existing {
            handler(context_type);
        }
        Ok(self.inner.hook_subscription(id))
    }

    /// Call `handler` with the context type each time the other party
    /// removes a context listener.
    pub fn on_unsubscribe<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let mut hooks = self.inner.hooks.lock();
        self.inner.ensure_feed(&mut hooks)?;
        let id = hooks.push(HookKind::Unsubscribe(Arc::new(handler)));
        Ok(self.inner.hook_subscription(id))
    }

    /// Call `handler` when the other party disconnects.
    pub fn on_disconnect<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_connected()?;
        let mut hooks = self.inner.hooks.lock();
        self.inner.ensure_feed(&mut hooks)?;
        let id = hooks.push(HookKind::Disconnect(Arc::new(handler)));
        Ok(self.inner.hook_subscription(id))
    }

    /// Leave the channel.
    ///
    /// Every listener this handle added is removed, in the order they were
    /// added, and each removal is announced to the other party. A single
    /// disconnect event follows. The handle's own hooks stop firing.
    /// Afterwards `broadcast` and `add_context_listener` fail with a state
    /// error. Calling this again does nothing.
    ///
    /// Leaving a private channel is final: this party can no longer claim
    /// or reopen it.
    pub fn disconnect(&self) {
        let listeners = {
            let mut state = self.inner.state.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            std::mem::take(&mut state.listeners)
        };
        for listener in &listeners {
            self.inner.release_listener(listener);
        }
        if self.inner.kind == ChannelKind::Private {
            self.inner.record_departure();
        }
        self.inner.publish(&ChannelEvent::Disconnect);

        let mut hooks = self.inner.hooks.lock();
        hooks.entries.clear();
        if let Some(feed) = hooks.feed.take() {
            feed.unsubscribe();
        }
        info!(channel = %self.inner.id, kind = ?self.inner.kind, "disconnected");
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// A context listener added through [`Channel::add_context_listener`].
pub struct ContextListener {
    channel: Arc<ChannelInner>,
    inner: Arc<ListenerInner>,
}

impl ContextListener {
    pub fn id(&self) -> &str {
        &self.inner.record.id
    }

    pub fn context_type(&self) -> Option<&str> {
        self.inner.record.context_type.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop deliveries and announce the removal to the other party.
    /// Idempotent.
    pub fn unsubscribe(&self) {
        self.channel
            .state
            .lock()
            .listeners
            .retain(|l| !Arc::ptr_eq(l, &self.inner));
        self.channel.release_listener(&self.inner);
    }
}

impl std::fmt::Debug for ContextListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextListener")
            .field("id", &self.inner.record.id)
            .field("context_type", &self.inner.record.context_type)
            .field("active", &self.is_active())
            .finish()
    }
}
