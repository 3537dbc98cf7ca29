//! Per-instance transport endpoint.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::method::{method_handler, Invocation, Message, MethodHandler, Target};
use crate::subscription::{Mailbox, Subscription};

/// An instance's connection to the [`Bus`].
///
/// Everything sent through a Transport carries the owning instance as its
/// publisher or caller. Cloning is cheap.
#[derive(Clone)]
pub struct Transport {
    bus: Bus,
    instance: Instance,
}

impl Transport {
    pub(crate) fn new(bus: Bus, instance: Instance) -> Self {
        Self { bus, instance }
    }

    /// The instance this endpoint belongs to.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The bus this endpoint is connected to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Publish `payload` on `topic`. Fire-and-forget, at most once per
    /// current subscriber.
    pub fn publish(&self, topic: &str, payload: Value) {
        self.bus.publish(&self.instance, topic, payload);
    }

    /// Call `handler` for every message published on `topic`, in order.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<Subscription>
    where
        F: FnMut(Message) + Send + 'static,
    {
        if topic.is_empty() {
            return Err(Error::validation("topic must not be empty"));
        }
        Ok(self
            .bus
            .subscribe(self.instance.id, topic, Mailbox::spawn(handler)))
    }

    /// Register an interop method served by this instance.
    ///
    /// # Errors
    ///
    /// * `Validation` - `name` is empty.
    /// * `Conflict` - this instance already serves `name`.
    pub fn register<F, Fut>(&self, name: &str, handler: F) -> Result<MethodRegistration>
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_handler(name, method_handler(handler))
    }

    /// Register an already-boxed handler.
    pub fn register_handler(
        &self,
        name: &str,
        handler: MethodHandler,
    ) -> Result<MethodRegistration> {
        let registration = self.bus.register(&self.instance, name, handler)?;
        Ok(MethodRegistration {
            bus: self.bus.clone(),
            instance: self.instance.clone(),
            name: name.to_string(),
            registration,
            released: AtomicBool::new(false),
        })
    }

    /// Stop serving `name`. A no-op when not registered.
    pub fn unregister(&self, name: &str) {
        self.bus.unregister(self.instance.id, name, None);
    }

    /// Invoke a method on one server and wait for its result.
    ///
    /// The handler runs in its own task, so a panicking handler surfaces as
    /// a `Handler` error instead of taking down the caller.
    pub async fn invoke(&self, method: &str, args: Value, target: Target) -> Result<Value> {
        if method.is_empty() {
            return Err(Error::validation("method name must not be empty"));
        }
        let (server, handler) = self.bus.find_server(method, &target)?;
        debug!(method, server = %server.id, caller = %self.instance.id, "invoking method");
        self.call(handler, method, args).await
    }

    /// Invoke a method on every live server. Results are in registration
    /// order; an individual failure does not affect the others.
    pub async fn invoke_all(&self, method: &str, args: Value) -> Result<Vec<(Instance, Result<Value>)>> {
        let servers = self.bus.all_servers(method);
        if servers.is_empty() {
            return Err(Error::not_found(format!("method '{}'", method)));
        }

        let calls = servers.into_iter().map(|(server, handler)| {
            let args = args.clone();
            async move {
                let result = self.call(handler, method, args).await;
                (server, result)
            }
        });
        Ok(futures::future::join_all(calls).await)
    }

    async fn call(&self, handler: MethodHandler, method: &str, args: Value) -> Result<Value> {
        let invocation = Invocation {
            method: method.to_string(),
            args,
            caller: self.instance.clone(),
        };
        match tokio::spawn(handler(invocation)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(method, error = %e, "method handler panicked");
                Err(Error::handler(format!("method '{}' panicked", method)))
            }
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("instance", &self.instance)
            .finish()
    }
}

/// Handle to a registered method.
///
/// [`unregister`](Self::unregister) is idempotent and only ever removes this
/// exact registration. Dropping the handle does not unregister.
pub struct MethodRegistration {
    bus: Bus,
    instance: Instance,
    name: String,
    registration: u64,
    released: AtomicBool,
}

impl MethodRegistration {
    /// The registered method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the registration. Returns true only on the call that actually
    /// removed it.
    pub fn unregister(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.bus
            .unregister(self.instance.id, &self.name, Some(self.registration))
    }

    /// Whether [`unregister`](Self::unregister) has been called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MethodRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistration")
            .field("name", &self.name)
            .field("instance", &self.instance.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::DiscoveryEvent;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("closed")
    }

    #[tokio::test]
    async fn invoke_round_trip() {
        let bus = Bus::new();
        let server = bus.endpoint(Instance::new("calc"));
        let client = bus.endpoint(Instance::new("client"));

        server
            .register("sum", |inv| async move {
                let items = inv.args.as_array().cloned().unwrap_or_default();
                Ok(json!(items.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
            })
            .unwrap();

        let result = client.invoke("sum", json!([1, 2, 3]), Target::Best).await;
        assert_eq!(result, Ok(json!(6)));
    }

    #[tokio::test]
    async fn invoke_sees_caller() {
        let bus = Bus::new();
        let server = bus.endpoint(Instance::new("who"));
        let client = bus.endpoint(Instance::new("client"));
        server
            .register("whoami", |inv| async move { Ok(json!(inv.caller.application)) })
            .unwrap();

        let result = client.invoke("whoami", Value::Null, Target::Best).await;
        assert_eq!(result, Ok(json!("client")));
    }

    #[tokio::test]
    async fn invoke_unknown_method_is_not_found() {
        let bus = Bus::new();
        let client = bus.endpoint(Instance::new("client"));
        let err = client
            .invoke("missing", Value::Null, Target::Best)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn invoke_routes_by_target() {
        let bus = Bus::new();
        let a = bus.endpoint(Instance::new("a"));
        let b = bus.endpoint(Instance::new("b"));
        let client = bus.endpoint(Instance::new("client"));
        a.register("name", |_| async { Ok(json!("a")) }).unwrap();
        b.register("name", |_| async { Ok(json!("b")) }).unwrap();

        let best = client.invoke("name", Value::Null, Target::Best).await;
        assert_eq!(best, Ok(json!("a")));

        let by_app = client
            .invoke("name", Value::Null, Target::Application("b".into()))
            .await;
        assert_eq!(by_app, Ok(json!("b")));

        let by_id = client
            .invoke("name", Value::Null, Target::Instance(b.instance().id))
            .await;
        assert_eq!(by_id, Ok(json!("b")));

        let missing = client
            .invoke("name", Value::Null, Target::Application("c".into()))
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn handler_error_and_panic_surface_to_caller() {
        let bus = Bus::new();
        let server = bus.endpoint(Instance::new("server"));
        let client = bus.endpoint(Instance::new("client"));
        server
            .register("fail", |_| async { Err(Error::handler("nope")) })
            .unwrap();
        server
            .register("panic", |_| async {
                let missing: Option<Value> = None;
                Ok(missing.expect("boom"))
            })
            .unwrap();

        let err = client.invoke("fail", Value::Null, Target::Best).await;
        assert_eq!(err, Err(Error::handler("nope")));

        let err = client
            .invoke("panic", Value::Null, Target::Best)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Handler(_)));
    }

    #[tokio::test]
    async fn invoke_all_collects_every_server() {
        let bus = Bus::new();
        let a = bus.endpoint(Instance::new("a"));
        let b = bus.endpoint(Instance::new("b"));
        let client = bus.endpoint(Instance::new("client"));
        a.register("name", |_| async { Ok(json!("a")) }).unwrap();
        b.register("name", |_| async { Err(Error::handler("b failed")) })
            .unwrap();

        let results = client.invoke_all("name", Value::Null).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1, Ok(json!("a")));
        assert!(results[1].1.is_err());
    }

    #[tokio::test]
    async fn registration_unregisters_once() {
        let bus = Bus::new();
        let server = bus.endpoint(Instance::new("server"));
        let mut watch = bus.watch_discovery();

        let registration = server.register("tmp", |_| async { Ok(Value::Null) }).unwrap();
        assert!(registration.unregister());
        assert!(!registration.unregister());
        assert!(registration.is_released());
        assert!(bus.servers("tmp").is_empty());

        let mut removed = 0;
        for _ in 0..4 {
            if let DiscoveryEvent::ServerMethodRemoved { .. } = watch.next().await.unwrap() {
                removed += 1;
            }
        }
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn unregister_by_name_is_noop_when_absent() {
        let bus = Bus::new();
        let server = bus.endpoint(Instance::new("server"));
        server.unregister("never-registered");
        assert!(bus.methods().is_empty());
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_in_order() {
        let bus = Bus::new();
        let publisher = bus.endpoint(Instance::new("pub"));
        let subscriber = bus.endpoint(Instance::new("sub"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let sub = subscriber
            .subscribe("prices", move |msg| {
                let _ = tx.send(msg);
            })
            .unwrap();

        for n in 0..10 {
            publisher.publish("prices", json!(n));
        }
        for n in 0..10 {
            let msg = recv(&mut rx).await;
            assert_eq!(msg.payload, json!(n));
            assert_eq!(msg.publisher.application, "pub");
        }

        sub.unsubscribe();
        publisher.publish("prices", json!("late"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_drops_topic_subscriptions() {
        let bus = Bus::new();
        let publisher = bus.endpoint(Instance::new("pub"));
        let subscriber = bus.endpoint(Instance::new("sub"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = subscriber
            .subscribe("t", move |msg| {
                let _ = tx.send(msg);
            })
            .unwrap();

        bus.disconnect(subscriber.instance().id);
        publisher.publish("t", json!(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        // Unsubscribing after the resource is gone is harmless.
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let bus = Bus::new();
        let t = bus.endpoint(Instance::new("a"));
        let err = t.subscribe("", |_| {}).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
