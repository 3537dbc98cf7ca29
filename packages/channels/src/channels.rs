//! The per-instance channel service.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use interop_context_store::ContextStore;
use interop_registry::{Registry, RegistryEvent};
use interop_transport::{Error, Instance, Result, Subscription, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::{Channel, ChannelKind, ContextListener};
use crate::config::{ChannelsConfig, SystemChannelDefinition};
use crate::context::{validate_context, validate_context_type};
use crate::document;

type ContextHandler = Arc<dyn Fn(Value) + Send + Sync>;

struct UserListenerInner {
    context_type: Option<String>,
    handler: ContextHandler,
    /// The listener on the current user channel, if joined.
    attached: Mutex<Option<ContextListener>>,
}

impl UserListenerInner {
    fn attach(&self, channel: &Channel) -> Result<()> {
        let handler = self.handler.clone();
        let listener =
            channel.add_context_listener(self.context_type.as_deref(), move |context| {
                handler(context)
            })?;
        if let Some(previous) = self.attached.lock().replace(listener) {
            previous.unsubscribe();
        }
        Ok(())
    }

    fn detach(&self) {
        if let Some(listener) = self.attached.lock().take() {
            listener.unsubscribe();
        }
    }
}

#[derive(Default)]
struct ChannelsState {
    /// The joined user channel.
    current: Option<Channel>,
    /// Open handles by document name.
    handles: HashMap<String, Channel>,
    user_listeners: Vec<Arc<UserListenerInner>>,
    lifecycle: Option<Subscription>,
    closed: bool,
}

struct ChannelsInner {
    transport: Transport,
    store: ContextStore,
    config: ChannelsConfig,
    state: Mutex<ChannelsState>,
}

/// One instance's view of the channel layer.
///
/// Hands out [`Channel`] handles for system, app and private channels,
/// tracks which user channel the instance has joined, and keeps top-level
/// context listeners attached to whatever that channel is. When the
/// instance leaves the registry, every channel it holds is disconnected.
///
/// # Example
///
/// ```ignore
/// let channels = Channels::new(transport, &registry, store, ChannelsConfig::default());
///
/// channels.join_user_channel("red")?;
/// channels.add_context_listener(Some("fdc3.instrument"), |ctx| println!("{ctx}"))?;
/// channels.broadcast(json!({"type": "fdc3.instrument", "id": {"ticker": "AAPL"}}))?;
/// ```
#[derive(Clone)]
pub struct Channels {
    inner: Arc<ChannelsInner>,
}

impl Channels {
    pub fn new(
        transport: Transport,
        registry: &Registry,
        store: ContextStore,
        config: ChannelsConfig,
    ) -> Self {
        let channels = Self {
            inner: Arc::new(ChannelsInner {
                transport,
                store,
                config,
                state: Mutex::new(ChannelsState::default()),
            }),
        };

        let me = channels.instance().id;
        let weak: Weak<ChannelsInner> = Arc::downgrade(&channels.inner);
        let lifecycle = registry.subscribe(move |event| {
            if let RegistryEvent::InstanceRemoved(instance) = event {
                if instance.id == me {
                    if let Some(inner) = weak.upgrade() {
                        Channels { inner }.disconnect_all();
                    }
                }
            }
        });
        channels.inner.state.lock().lifecycle = Some(lifecycle);
        channels
    }

    pub fn instance(&self) -> &Instance {
        self.inner.transport.instance()
    }

    pub fn config(&self) -> &ChannelsConfig {
        &self.inner.config
    }

    /// The fixed catalog of system channels.
    pub fn system_channels(&self) -> &[SystemChannelDefinition] {
        &self.inner.config.system_channels
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.state.lock().closed {
            return Err(Error::state(format!(
                "instance {} has disconnected from the channel layer",
                self.instance().id
            )));
        }
        Ok(())
    }

    /// Get this service's handle for a channel, opening a new one if there
    /// is none or the old one was disconnected. A private channel this
    /// instance has left is not reopened.
    fn handle(&self, kind: ChannelKind, id: &str) -> Result<Channel> {
        let name = document::document_name(kind, id);
        let mut state = self.inner.state.lock();
        if let Some(channel) = state.handles.get(&name) {
            if channel.is_connected() {
                return Ok(channel.clone());
            }
        }
        if kind == ChannelKind::Private {
            let me = self.instance().id.to_string();
            if let Some(current) = self.inner.store.get(&name) {
                if document::has_disconnected(&current, &me) {
                    return Err(left_private_channel(id));
                }
            }
        }
        let channel = Channel::open(
            kind,
            id,
            self.inner.transport.clone(),
            self.inner.store.clone(),
        );
        state.handles.insert(name, channel.clone());
        Ok(channel)
    }

    /// Create the backing document unless it exists.
    fn seed(&self, kind: ChannelKind, id: &str) -> Result<()> {
        let name = document::document_name(kind, id);
        self.inner.store.transact(&name, |current| {
            Ok(match current {
                Some(_) => None,
                None => Some(Value::Object(document::initial(kind, id))),
            })
        })?;
        Ok(())
    }

    /// A handle on system channel `id`.
    ///
    /// # Errors
    ///
    /// * `NotFound` - `id` is not in the catalog.
    pub fn get_system_channel(&self, id: &str) -> Result<Channel> {
        self.ensure_open()?;
        if !self.system_channels().iter().any(|c| c.id == id) {
            return Err(Error::not_found(format!("no system channel '{}'", id)));
        }
        self.seed(ChannelKind::System, id)?;
        self.handle(ChannelKind::System, id)
    }

    /// A handle on app channel `id`, creating the channel on first use.
    pub fn get_or_create_channel(&self, id: &str) -> Result<Channel> {
        self.ensure_open()?;
        if id.is_empty() {
            return Err(Error::validation("channel id must not be empty"));
        }
        self.seed(ChannelKind::App, id)?;
        self.handle(ChannelKind::App, id)
    }

    /// Create a private channel owned by this instance. Hand its id to the
    /// one other party who should [`claim`](Self::claim_private_channel) it.
    pub fn create_private_channel(&self) -> Result<Channel> {
        self.ensure_open()?;
        let id = Uuid::new_v4().to_string();
        let mut seed = document::initial(ChannelKind::Private, &id);
        seed.insert(
            document::CREATOR.into(),
            Value::String(self.instance().id.to_string()),
        );
        self.inner.store.set(
            &document::document_name(ChannelKind::Private, &id),
            Value::Object(seed),
        )?;
        info!(channel = %id, "private channel created");
        self.handle(ChannelKind::Private, &id)
    }

    /// Take the second seat on private channel `id`.
    ///
    /// The creator gets its handle back without claiming. Anyone else
    /// claims the consumer seat; claiming again as the same consumer is
    /// allowed.
    ///
    /// # Errors
    ///
    /// * `NotFound` - no private channel `id`.
    /// * `Conflict` - another instance already holds the consumer seat.
    /// * `State` - this instance already disconnected from the channel.
    pub fn claim_private_channel(&self, id: &str) -> Result<Channel> {
        self.ensure_open()?;
        let name = document::document_name(ChannelKind::Private, id);
        let Some(current) = self.inner.store.get(&name) else {
            return Err(Error::not_found(format!("no private channel '{}'", id)));
        };
        let me = self.instance().id.to_string();
        if document::has_disconnected(&current, &me) {
            return Err(left_private_channel(id));
        }
        let creator = current.get(document::CREATOR).and_then(Value::as_str);
        if creator != Some(me.as_str()) {
            self.inner.store.claim(&name, document::CONSUMER, &me)?;
            debug!(channel = %id, "private channel claimed");
        }
        self.handle(ChannelKind::Private, id)
    }

    /// A handle on channel `id` of `kind`. App channels are created on first
    /// use; private channels are claimed.
    pub fn channel(&self, kind: ChannelKind, id: &str) -> Result<Channel> {
        match kind {
            ChannelKind::System => self.get_system_channel(id),
            ChannelKind::App => self.get_or_create_channel(id),
            ChannelKind::Private => self.claim_private_channel(id),
        }
    }

    /// Join system channel `id`, moving every top-level context listener to
    /// it. Joining the channel already joined changes nothing.
    pub fn join_user_channel(&self, id: &str) -> Result<Channel> {
        let channel = self.get_system_channel(id)?;
        let mut state = self.inner.state.lock();
        if let Some(current) = &state.current {
            if current.id() == id && current.is_connected() {
                return Ok(current.clone());
            }
        }
        for listener in &state.user_listeners {
            listener.attach(&channel)?;
        }
        state.current = Some(channel.clone());
        info!(channel = %id, "joined user channel");
        Ok(channel)
    }

    /// Leave the current user channel, if any. Top-level context listeners
    /// stay registered but receive nothing until the next join.
    pub fn leave_current_channel(&self) {
        let mut state = self.inner.state.lock();
        if let Some(channel) = state.current.take() {
            for listener in &state.user_listeners {
                listener.detach();
            }
            info!(channel = %channel.id(), "left user channel");
        }
    }

    pub fn current_channel(&self) -> Option<Channel> {
        self.inner.state.lock().current.clone()
    }

    /// Broadcast on the current user channel.
    ///
    /// # Errors
    ///
    /// * `Validation` - `context` has no string `type`.
    /// * `State` - not joined to a user channel.
    pub fn broadcast(&self, context: Value) -> Result<()> {
        validate_context(&context)?;
        let Some(channel) = self.current_channel() else {
            return Err(Error::state("not joined to a user channel"));
        };
        channel.broadcast(context)
    }

    /// Listen for contexts on whichever user channel this instance is
    /// joined to, now and after later joins.
    pub fn add_context_listener<F>(
        &self,
        context_type: Option<&str>,
        handler: F,
    ) -> Result<UserChannelListener>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        validate_context_type(context_type)?;
        let listener = Arc::new(UserListenerInner {
            context_type: context_type.map(str::to_string),
            handler: Arc::new(handler),
            attached: Mutex::new(None),
        });
        let mut state = self.inner.state.lock();
        if let Some(channel) = &state.current {
            listener.attach(channel)?;
        }
        state.user_listeners.push(listener.clone());
        Ok(UserChannelListener {
            inner: listener,
            channels: Arc::downgrade(&self.inner),
        })
    }

    /// Disconnect every channel handle this instance holds and drop its
    /// top-level listeners. Runs automatically when the instance is
    /// removed from the registry; later calls do nothing.
    pub fn disconnect_all(&self) {
        let (handles, listeners, lifecycle) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.current = None;
            (
                std::mem::take(&mut state.handles),
                std::mem::take(&mut state.user_listeners),
                state.lifecycle.take(),
            )
        };
        for listener in &listeners {
            listener.detach();
        }
        for channel in handles.values() {
            channel.disconnect();
        }
        if let Some(lifecycle) = lifecycle {
            lifecycle.unsubscribe();
        }
        info!(instance = %self.instance().id, channels = handles.len(), "channels disconnected");
    }
}

fn left_private_channel(id: &str) -> Error {
    Error::state(format!("already disconnected from private channel '{}'", id))
}

impl std::fmt::Debug for Channels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Channels")
            .field("instance", &self.inner.transport.instance().id)
            .field("current", &state.current.as_ref().map(Channel::id))
            .field("handles", &state.handles.len())
            .finish()
    }
}

/// A top-level context listener that follows the joined user channel.
pub struct UserChannelListener {
    inner: Arc<UserListenerInner>,
    channels: Weak<ChannelsInner>,
}

impl UserChannelListener {
    pub fn context_type(&self) -> Option<&str> {
        self.inner.context_type.as_deref()
    }

    /// Stop listening. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(channels) = self.channels.upgrade() {
            channels
                .state
                .lock()
                .user_listeners
                .retain(|l| !Arc::ptr_eq(l, &self.inner));
        }
        self.inner.detach();
    }
}
