//! The routing hub shared by every instance.
//!
//! The Bus owns the method table and topic subscriptions. Instances never
//! touch it directly; they go through their own [`Transport`] endpoint,
//! which stamps every publish, registration and call with the instance's
//! identity.
//!
//! All state lives behind one short-lived lock that is never held across an
//! await point. Deliveries are enqueued into each subscriber's
//! [`Mailbox`] while the lock is held, so discovery events are observed in
//! the order the table changed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::instance::{Instance, InstanceId};
use crate::method::{DiscoveryEvent, Message, MethodHandler, Target};
use crate::subscription::{Mailbox, Subscription};
use crate::transport::Transport;

/// A registered server of a method.
struct MethodEntry {
    server: Instance,
    handler: MethodHandler,
    registration: u64,
}

/// A topic subscriber.
struct TopicEntry {
    id: u64,
    owner: InstanceId,
    mailbox: Mailbox<Message>,
}

#[derive(Default)]
struct BusState {
    /// Servers per method name, in registration order.
    methods: BTreeMap<String, Vec<MethodEntry>>,
    topics: HashMap<String, Vec<TopicEntry>>,
    discovery: Vec<(u64, Mailbox<DiscoveryEvent>)>,
    next_id: u64,
}

impl BusState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&mut self, event: DiscoveryEvent) {
        trace!(?event, "discovery event");
        self.discovery
            .retain(|(_, mailbox)| mailbox.deliver(event.clone()));
    }

    /// Remove the servers of `method` matching `remove`, emitting the
    /// matching discovery events. Returns how many were removed.
    fn remove_servers(&mut self, method: &str, remove: impl Fn(&MethodEntry) -> bool) -> usize {
        let Some(entries) = self.methods.get_mut(method) else {
            return 0;
        };

        let mut removed = Vec::new();
        entries.retain(|entry| {
            if remove(entry) {
                removed.push(entry.server.clone());
                false
            } else {
                true
            }
        });
        let now_empty = entries.is_empty();
        if now_empty {
            self.methods.remove(method);
        }

        let count = removed.len();
        for server in removed {
            debug!(method, server = %server.id, "unregistered method");
            self.emit(DiscoveryEvent::ServerMethodRemoved {
                server,
                method: method.to_string(),
            });
        }
        if count > 0 && now_empty {
            self.emit(DiscoveryEvent::MethodRemoved {
                method: method.to_string(),
            });
        }
        count
    }
}

/// The shared routing hub.
///
/// Cloning a Bus is cheap; clones share the same state.
///
/// # Example
///
/// ```ignore
/// let bus = Bus::new();
/// let calc = bus.endpoint(Instance::new("calculator"));
/// let client = bus.endpoint(Instance::new("client"));
///
/// calc.register("sum", |inv| async move { Ok(inv.args) })?;
/// let result = client.invoke("sum", json!([1, 2]), Target::Best).await?;
/// ```
#[derive(Clone, Default)]
pub struct Bus {
    state: Arc<Mutex<BusState>>,
}

impl Bus {
    /// Create a new, empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the transport endpoint for an instance.
    pub fn endpoint(&self, instance: Instance) -> Transport {
        Transport::new(self.clone(), instance)
    }

    /// Call `handler` for every discovery event from now on.
    pub fn on_discovery<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(DiscoveryEvent) + Send + 'static,
    {
        self.add_discovery(Mailbox::spawn(handler))
    }

    /// Receive discovery events through a stream instead of a handler.
    ///
    /// Useful for awaiting a particular event with a timeout.
    pub fn watch_discovery(&self) -> DiscoveryWatch {
        let (mailbox, rx) = Mailbox::channel();
        let subscription = self.add_discovery(mailbox);
        DiscoveryWatch { rx, subscription }
    }

    fn add_discovery(&self, mailbox: Mailbox<DiscoveryEvent>) -> Subscription {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.discovery.push((id, mailbox));
        drop(state);

        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().discovery.retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Live servers of a method, in registration order.
    pub fn servers(&self, method: &str) -> Vec<Instance> {
        self.state
            .lock()
            .methods
            .get(method)
            .map(|entries| entries.iter().map(|e| e.server.clone()).collect())
            .unwrap_or_default()
    }

    /// Names of the methods an instance currently serves.
    pub fn methods_of(&self, instance: InstanceId) -> Vec<String> {
        self.state
            .lock()
            .methods
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.server.id == instance))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of every method with at least one server.
    pub fn methods(&self) -> Vec<String> {
        self.state.lock().methods.keys().cloned().collect()
    }

    /// Drop every method and topic subscription owned by an instance.
    pub fn disconnect(&self, instance: InstanceId) {
        let mut state = self.state.lock();
        let names: Vec<String> = state
            .methods
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.server.id == instance))
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            state.remove_servers(&name, |e| e.server.id == instance);
        }

        for entries in state.topics.values_mut() {
            entries.retain(|e| e.owner != instance);
        }
        state.topics.retain(|_, entries| !entries.is_empty());
        debug!(instance = %instance, "disconnected from bus");
    }

    pub(crate) fn register(
        &self,
        server: &Instance,
        name: &str,
        handler: MethodHandler,
    ) -> Result<u64> {
        if name.is_empty() {
            return Err(Error::validation("method name must not be empty"));
        }

        let mut state = self.state.lock();
        if let Some(entries) = state.methods.get(name) {
            if entries.iter().any(|e| e.server.id == server.id) {
                return Err(Error::conflict(format!(
                    "method '{}' is already registered by instance {}",
                    name, server.id
                )));
            }
        }

        let registration = state.next_id();
        let entries = state.methods.entry(name.to_string()).or_default();
        let first = entries.is_empty();
        entries.push(MethodEntry {
            server: server.clone(),
            handler,
            registration,
        });

        if first {
            state.emit(DiscoveryEvent::MethodAdded {
                method: name.to_string(),
            });
        }
        state.emit(DiscoveryEvent::ServerMethodAdded {
            server: server.clone(),
            method: name.to_string(),
        });
        debug!(method = name, server = %server.id, "registered method");
        Ok(registration)
    }

    /// Remove a server. With `registration` set, only that exact
    /// registration is removed, so a stale handle cannot remove a newer one.
    pub(crate) fn unregister(
        &self,
        server: InstanceId,
        name: &str,
        registration: Option<u64>,
    ) -> bool {
        let mut state = self.state.lock();
        state.remove_servers(name, |e| {
            e.server.id == server && registration.map_or(true, |r| r == e.registration)
        }) > 0
    }

    pub(crate) fn find_server(
        &self,
        method: &str,
        target: &Target,
    ) -> Result<(Instance, MethodHandler)> {
        let state = self.state.lock();
        let entries = state
            .methods
            .get(method)
            .ok_or_else(|| Error::not_found(format!("method '{}'", method)))?;
        entries
            .iter()
            .find(|e| target.accepts(&e.server))
            .map(|e| (e.server.clone(), e.handler.clone()))
            .ok_or_else(|| Error::not_found(format!("method '{}' on {}", method, target)))
    }

    pub(crate) fn all_servers(&self, method: &str) -> Vec<(Instance, MethodHandler)> {
        self.state
            .lock()
            .methods
            .get(method)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.server.clone(), e.handler.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn publish(&self, publisher: &Instance, topic: &str, payload: Value) {
        let mut state = self.state.lock();
        let Some(entries) = state.topics.get_mut(topic) else {
            trace!(topic, "publish with no subscribers");
            return;
        };
        entries.retain(|entry| {
            entry.mailbox.deliver(Message {
                topic: topic.to_string(),
                payload: payload.clone(),
                publisher: publisher.clone(),
            })
        });
    }

    pub(crate) fn subscribe(
        &self,
        owner: InstanceId,
        topic: &str,
        mailbox: Mailbox<Message>,
    ) -> Subscription {
        let mut state = self.state.lock();
        let id = state.next_id();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(TopicEntry { id, owner, mailbox });
        drop(state);

        let weak: Weak<Mutex<BusState>> = Arc::downgrade(&self.state);
        let topic = topic.to_string();
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock();
                if let Some(entries) = state.topics.get_mut(&topic) {
                    entries.retain(|e| e.id != id);
                    if entries.is_empty() {
                        state.topics.remove(&topic);
                    }
                }
            }
        })
    }
}

/// A stream of discovery events.
///
/// Closing the watch (or dropping it) releases the registration on the bus.
pub struct DiscoveryWatch {
    rx: mpsc::UnboundedReceiver<DiscoveryEvent>,
    subscription: Subscription,
}

impl DiscoveryWatch {
    /// Wait for the next event. Returns `None` once closed.
    pub async fn next(&mut self) -> Option<DiscoveryEvent> {
        self.rx.recv().await
    }

    /// Stop receiving events.
    pub fn close(&mut self) {
        self.subscription.unsubscribe();
        self.rx.close();
    }
}

impl Drop for DiscoveryWatch {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::method_handler;

    fn echo() -> MethodHandler {
        method_handler(|inv| async move { Ok(inv.args) })
    }

    #[tokio::test]
    async fn register_emits_method_and_server_events() {
        let bus = Bus::new();
        let mut watch = bus.watch_discovery();
        let a = Instance::new("a");
        let b = Instance::new("b");

        bus.register(&a, "sum", echo()).unwrap();
        bus.register(&b, "sum", echo()).unwrap();

        assert_eq!(
            watch.next().await,
            Some(DiscoveryEvent::MethodAdded {
                method: "sum".into()
            })
        );
        assert_eq!(
            watch.next().await,
            Some(DiscoveryEvent::ServerMethodAdded {
                server: a.clone(),
                method: "sum".into()
            })
        );
        // The second server does not re-announce the method.
        assert_eq!(
            watch.next().await,
            Some(DiscoveryEvent::ServerMethodAdded {
                server: b.clone(),
                method: "sum".into()
            })
        );
        assert_eq!(bus.servers("sum"), vec![a, b]);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let bus = Bus::new();
        let a = Instance::new("a");
        bus.register(&a, "sum", echo()).unwrap();
        let err = bus.register(&a, "sum", echo()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn empty_method_name_is_rejected() {
        let bus = Bus::new();
        let err = bus.register(&Instance::new("a"), "", echo()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn stale_registration_does_not_remove_newer_one() {
        let bus = Bus::new();
        let a = Instance::new("a");
        let first = bus.register(&a, "sum", echo()).unwrap();
        assert!(bus.unregister(a.id, "sum", Some(first)));
        let _second = bus.register(&a, "sum", echo()).unwrap();

        assert!(!bus.unregister(a.id, "sum", Some(first)));
        assert_eq!(bus.servers("sum").len(), 1);
    }

    #[tokio::test]
    async fn disconnect_removes_methods_and_emits_events() {
        let bus = Bus::new();
        let a = Instance::new("a");
        bus.register(&a, "one", echo()).unwrap();
        bus.register(&a, "two", echo()).unwrap();

        let mut watch = bus.watch_discovery();
        bus.disconnect(a.id);

        let mut removed = Vec::new();
        for _ in 0..4 {
            removed.push(watch.next().await.unwrap());
        }
        assert_eq!(
            removed,
            vec![
                DiscoveryEvent::ServerMethodRemoved {
                    server: a.clone(),
                    method: "one".into()
                },
                DiscoveryEvent::MethodRemoved {
                    method: "one".into()
                },
                DiscoveryEvent::ServerMethodRemoved {
                    server: a.clone(),
                    method: "two".into()
                },
                DiscoveryEvent::MethodRemoved {
                    method: "two".into()
                },
            ]
        );
        assert!(bus.methods_of(a.id).is_empty());
        assert!(bus.methods().is_empty());
    }

    #[tokio::test]
    async fn closed_watch_is_released() {
        let bus = Bus::new();
        let mut watch = bus.watch_discovery();
        watch.close();
        assert_eq!(bus.state.lock().discovery.len(), 0);
        assert_eq!(watch.next().await, None);
    }
}
