//! The instance registry.

use std::sync::Arc;

use interop_transport::{
    Bus, Error, Instance, InstanceId, Mailbox, Result, Subscription, Target, Transport,
};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Instance lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// An instance connected.
    InstanceAdded(Instance),
    /// An instance disconnected. Its methods and subscriptions are already
    /// gone from the bus when this is delivered.
    InstanceRemoved(Instance),
}

impl RegistryEvent {
    pub fn instance(&self) -> &Instance {
        match self {
            RegistryEvent::InstanceAdded(instance) | RegistryEvent::InstanceRemoved(instance) => {
                instance
            }
        }
    }
}

#[derive(Default)]
struct RegistryState {
    /// Live instances in connection order.
    instances: Vec<Instance>,
    listeners: Vec<(u64, Mailbox<RegistryEvent>)>,
    next_id: u64,
}

impl RegistryState {
    fn emit(&mut self, event: RegistryEvent) {
        self.listeners
            .retain(|(_, mailbox)| mailbox.deliver(event.clone()));
    }
}

/// Tracks live instances and resolves targets.
///
/// The Registry is an explicit value built once when the core starts and
/// passed to every component that needs it. Cloning is cheap; clones share
/// state.
///
/// # Example
///
/// ```ignore
/// let registry = Registry::new(Bus::new());
/// let chart = registry.connect("chart")?;
///
/// assert_eq!(registry.instances_of("chart").len(), 1);
///
/// registry.disconnect(chart.instance().id);
/// ```
#[derive(Clone)]
pub struct Registry {
    bus: Bus,
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    /// Create a registry over `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    /// The bus shared by all registered instances.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Connect a new instance of `application` and return its transport.
    pub fn connect(&self, application: &str) -> Result<Transport> {
        if application.is_empty() {
            return Err(Error::validation("application name must not be empty"));
        }
        self.connect_instance(Instance::new(application))
    }

    /// Connect an instance whose identity was chosen by the caller.
    ///
    /// # Errors
    ///
    /// * `Conflict` - an instance with the same id is already connected.
    pub fn connect_instance(&self, instance: Instance) -> Result<Transport> {
        let mut state = self.state.lock();
        if state.instances.iter().any(|i| i.id == instance.id) {
            return Err(Error::conflict(format!(
                "instance {} is already connected",
                instance.id
            )));
        }
        state.instances.push(instance.clone());
        state.emit(RegistryEvent::InstanceAdded(instance.clone()));
        info!(instance = %instance.id, application = %instance.application, "instance connected");

        Ok(self.bus.endpoint(instance))
    }

    /// Disconnect an instance, dropping its methods and subscriptions.
    ///
    /// Returns false (and does nothing) for unknown ids.
    pub fn disconnect(&self, id: InstanceId) -> bool {
        let mut state = self.state.lock();
        let Some(position) = state.instances.iter().position(|i| i.id == id) else {
            debug!(instance = %id, "disconnect of unknown instance ignored");
            return false;
        };
        let instance = state.instances.remove(position);
        self.bus.disconnect(id);
        state.emit(RegistryEvent::InstanceRemoved(instance.clone()));
        info!(instance = %id, application = %instance.application, "instance disconnected");
        true
    }

    /// Look up a live instance.
    pub fn instance(&self, id: InstanceId) -> Option<Instance> {
        self.state
            .lock()
            .instances
            .iter()
            .find(|i| i.id == id)
            .cloned()
    }

    /// All live instances in connection order.
    pub fn instances(&self) -> Vec<Instance> {
        self.state.lock().instances.clone()
    }

    /// Live instances of one application.
    pub fn instances_of(&self, application: &str) -> Vec<Instance> {
        self.state
            .lock()
            .instances
            .iter()
            .filter(|i| i.application == application)
            .cloned()
            .collect()
    }

    /// Live servers of a method, in registration order.
    pub fn servers(&self, method: &str) -> Vec<Instance> {
        self.bus.servers(method)
    }

    /// Methods an instance currently serves.
    pub fn methods_of(&self, id: InstanceId) -> Vec<String> {
        self.bus.methods_of(id)
    }

    /// Live instances matching `target`.
    ///
    /// # Errors
    ///
    /// * `NotFound` - nothing matches.
    pub fn resolve(&self, target: &Target) -> Result<Vec<Instance>> {
        let matches: Vec<Instance> = self
            .state
            .lock()
            .instances
            .iter()
            .filter(|i| target.accepts(i))
            .cloned()
            .collect();
        if matches.is_empty() {
            return Err(Error::not_found(format!("no live instance for {}", target)));
        }
        Ok(matches)
    }

    /// Call `handler` for every instance lifecycle event from now on.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(RegistryEvent) + Send + 'static,
    {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.listeners.push((id, Mailbox::spawn(handler)));
        drop(state);

        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("instances", &self.state.lock().instances.len())
            .finish()
    }
}
