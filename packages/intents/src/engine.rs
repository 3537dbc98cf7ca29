//! The per-instance intents service.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use interop_channels::{validate_context, Channels, UserChannelListener};
use interop_context_store::ContextStore;
use interop_registry::{Registry, RegistryEvent};
use interop_transport::{
    DiscoveryEvent, Error, Instance, InstanceId, Invocation, Result, Subscription, Target,
    Transport,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::IntentsConfig;
use crate::directory::AppDirectory;
use crate::finder::AppIntent;
use crate::launcher::{LaunchOptions, Launcher, NoLauncher, OpenContextRequest};
use crate::listener::{intent_method, listener_claims, IntentHandlerResult, IntentListener};
use crate::policy::{IntentCandidate, ResolutionPolicy};
use crate::resolution::{AppIdentifier, IntentResolution};

const OPEN_CONTEXT_PREFIX: &str = "___openContext___";

struct IntentsInner {
    transport: Transport,
    registry: Registry,
    store: ContextStore,
    channels: Channels,
    directory: Arc<AppDirectory>,
    launcher: Arc<dyn Launcher>,
    policy: Arc<dyn ResolutionPolicy>,
    config: IntentsConfig,
    /// The opener's request, until a matching context listener takes it.
    startup: Mutex<Option<OpenContextRequest>>,
}

/// Builds an [`Intents`] service. A resolution policy is required.
pub struct IntentsBuilder {
    transport: Transport,
    registry: Registry,
    store: ContextStore,
    channels: Channels,
    directory: Arc<AppDirectory>,
    launcher: Arc<dyn Launcher>,
    policy: Option<Arc<dyn ResolutionPolicy>>,
    config: IntentsConfig,
    startup: Option<OpenContextRequest>,
}

impl IntentsBuilder {
    /// The launcher used for cold starts and `open`. Defaults to
    /// [`NoLauncher`].
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn ResolutionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn config(mut self, config: IntentsConfig) -> Self {
        self.config = config;
        self
    }

    /// Deliver the opener's context to the first matching context listener
    /// this instance adds.
    pub fn with_startup(mut self, request: OpenContextRequest) -> Self {
        self.startup = Some(request);
        self
    }

    pub fn build(self) -> Result<Intents> {
        let policy = self
            .policy
            .ok_or_else(|| Error::config("an intent resolution policy is required"))?;
        release_claims_on_removal(&self.registry, &self.store, self.transport.instance().id);
        Ok(Intents {
            inner: Arc::new(IntentsInner {
                transport: self.transport,
                registry: self.registry,
                store: self.store,
                channels: self.channels,
                directory: self.directory,
                launcher: self.launcher,
                policy,
                config: self.config,
                startup: Mutex::new(self.startup),
            }),
        })
    }
}

/// Drop `instance`'s listener claims document once it leaves the registry.
fn release_claims_on_removal(registry: &Registry, store: &ContextStore, instance: InstanceId) {
    let store = store.clone();
    let claims = listener_claims(instance);
    let lifecycle: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let own = lifecycle.clone();
    let subscription = registry.subscribe(move |event| {
        let RegistryEvent::InstanceRemoved(removed) = event else {
            return;
        };
        if removed.id != instance {
            return;
        }
        if store.remove(&claims).is_some() {
            debug!(instance = %instance, "intent listener claims released");
        }
        if let Some(subscription) = own.lock().take() {
            subscription.unsubscribe();
        }
    });
    *lifecycle.lock() = Some(subscription);
}

/// One instance's intents service: discovery, listening, raising and
/// opening applications.
///
/// # Example
///
/// ```ignore
/// let intents = Intents::builder(transport, registry, store, channels, directory)
///     .policy(Arc::new(RejectAmbiguous))
///     .launcher(launcher)
///     .build()?;
///
/// let resolution = intents
///     .raise_intent("ViewChart", json!({"type": "fdc3.instrument"}), None)
///     .await?;
/// let result = resolution.get_result().await?;
/// ```
#[derive(Clone)]
pub struct Intents {
    inner: Arc<IntentsInner>,
}

impl Intents {
    pub fn builder(
        transport: Transport,
        registry: Registry,
        store: ContextStore,
        channels: Channels,
        directory: Arc<AppDirectory>,
    ) -> IntentsBuilder {
        IntentsBuilder {
            transport,
            registry,
            store,
            channels,
            directory,
            launcher: Arc::new(NoLauncher),
            policy: None,
            config: IntentsConfig::default(),
            startup: None,
        }
    }

    pub fn instance(&self) -> &Instance {
        self.inner.transport.instance()
    }

    pub fn directory(&self) -> &AppDirectory {
        &self.inner.directory
    }

    pub fn channels(&self) -> &Channels {
        &self.inner.channels
    }

    pub fn config(&self) -> &IntentsConfig {
        &self.inner.config
    }

    /// See [`AppDirectory::find_intent`].
    pub fn find_intent(
        &self,
        intent: &str,
        context: Option<&Value>,
        result_type: Option<&str>,
    ) -> Result<AppIntent> {
        self.inner.directory.find_intent(intent, context, result_type)
    }

    /// See [`AppDirectory::find_intents_by_context`].
    pub fn find_intents_by_context(
        &self,
        context: &Value,
        result_type: Option<&str>,
    ) -> Result<Vec<AppIntent>> {
        self.inner
            .directory
            .find_intents_by_context(context, result_type)
    }

    /// Handle intent `intent` in this instance.
    ///
    /// The handler gets the raised context and the raising instance. It
    /// may return a context, a channel, `()` or an [`IntentHandlerResult`].
    ///
    /// # Errors
    ///
    /// * `Validation` - empty `intent`.
    /// * `Conflict` - this instance already listens to `intent`.
    pub fn add_intent_listener<F, Fut, R>(&self, intent: &str, handler: F) -> Result<IntentListener>
    where
        F: Fn(Value, Instance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<IntentHandlerResult> + Send + 'static,
    {
        if intent.is_empty() {
            return Err(Error::validation("intent name must not be empty"));
        }
        let me = self.instance().id;
        let claims = listener_claims(me);
        let claimant = Uuid::new_v4().to_string();
        self.inner
            .store
            .claim(&claims, intent, &claimant)
            .map_err(|e| match e {
                Error::Conflict(_) => Error::conflict(format!(
                    "instance {} already listens to intent '{}'",
                    me, intent
                )),
                other => other,
            })?;

        let handler = Arc::new(handler);
        let registered = self
            .inner
            .transport
            .register(&intent_method(intent), move |invocation: Invocation| {
                let handler = handler.clone();
                async move {
                    let result: IntentHandlerResult =
                        handler(invocation.args, invocation.caller).await?.into();
                    Ok::<_, Error>(result.into_wire())
                }
            });
        let registration = match registered {
            Ok(registration) => registration,
            Err(e) => {
                let _ = self.inner.store.release(&claims, intent, &claimant);
                return Err(e);
            }
        };

        info!(intent, instance = %me, "intent listener added");
        Ok(IntentListener::new(
            intent,
            registration,
            self.inner.store.clone(),
            claims,
            claimant,
        ))
    }

    /// Raise intent `intent` with `context` on a live listener.
    ///
    /// Returns as soon as a listener is chosen and invoked; the handler's
    /// outcome comes from [`IntentResolution::get_result`]. With several
    /// listeners and no target, the resolution policy chooses.
    ///
    /// # Errors
    ///
    /// * `Validation` - empty `intent` or malformed `context`.
    /// * `NotFound` - no live listener (on `target`, if given).
    /// * whatever the policy returns when it declines to choose.
    pub async fn raise_intent(
        &self,
        intent: &str,
        context: Value,
        target: Option<&AppIdentifier>,
    ) -> Result<IntentResolution> {
        if intent.is_empty() {
            return Err(Error::validation("intent name must not be empty"));
        }
        validate_context(&context)?;

        let candidates: Vec<IntentCandidate> = self
            .inner
            .registry
            .servers(&intent_method(intent))
            .into_iter()
            .filter(|server| target.map_or(true, |t| t.accepts(server)))
            .map(|server| IntentCandidate {
                intent: intent.to_string(),
                app: server.application.clone(),
                instance: Some(server),
            })
            .collect();
        if candidates.is_empty() {
            return Err(match target {
                Some(target) => Error::not_found(format!(
                    "no listener for intent '{}' in {}",
                    intent, target.app_id
                )),
                None => Error::not_found(format!("no listener for intent '{}'", intent)),
            });
        }

        let chosen = self.choose(&context, candidates, target).await?;
        let server = chosen.instance.ok_or_else(|| {
            Error::not_found(format!("no live listener chosen for intent '{}'", intent))
        })?;
        Ok(self.dispatch(intent, context, server))
    }

    /// Raise whichever intent handles `context`'s type.
    ///
    /// Live listeners of matching catalog entries are preferred. If there
    /// are none, the chosen application is started and given
    /// `intent_resolution_timeout` to add its listener.
    ///
    /// # Errors
    ///
    /// * `Validation` - malformed `context`.
    /// * `NotFound` - no catalog entry accepts the context (in `target`).
    /// * `AppTimeout` - the started application never listened.
    pub async fn raise_intent_for_context(
        &self,
        context: Value,
        target: Option<&AppIdentifier>,
    ) -> Result<IntentResolution> {
        let context_type = validate_context(&context)?.to_string();

        let entries: Vec<(String, String)> = self
            .inner
            .directory
            .matching(Some(&context_type), None)
            .into_iter()
            .filter(|(app, _)| target.map_or(true, |t| t.app_id == app.name))
            .map(|(app, intent)| (app.name.clone(), intent.name.clone()))
            .collect();
        if entries.is_empty() {
            return Err(Error::not_found(format!(
                "no application handles context type '{}'",
                context_type
            )));
        }

        let mut live = Vec::new();
        for (app, intent) in &entries {
            for server in self.inner.registry.servers(&intent_method(intent)) {
                if server.application == *app && target.map_or(true, |t| t.accepts(&server)) {
                    live.push(IntentCandidate {
                        intent: intent.clone(),
                        app: app.clone(),
                        instance: Some(server),
                    });
                }
            }
        }

        if !live.is_empty() {
            let chosen = self.choose(&context, live, target).await?;
            if let Some(server) = chosen.instance {
                return Ok(self.dispatch(&chosen.intent, context, server));
            }
            return self.cold_start_and_dispatch(chosen, context).await;
        }

        if let Some(instance) = target.and_then(|t| t.instance_id) {
            return Err(Error::not_found(format!(
                "instance {} does not handle context type '{}'",
                instance, context_type
            )));
        }

        let candidates = entries
            .into_iter()
            .map(|(app, intent)| IntentCandidate {
                intent,
                app,
                instance: None,
            })
            .collect();
        let chosen = self.choose(&context, candidates, target).await?;
        self.cold_start_and_dispatch(chosen, context).await
    }

    /// Start application `app`. With a `context`, wait up to
    /// `open_context_timeout` for the new instance to fetch it.
    ///
    /// The temporary method serving the context is unregistered exactly
    /// once, whatever the outcome.
    ///
    /// # Errors
    ///
    /// * `NotFound` - `app` is not in the directory.
    /// * `Validation` - malformed `context`.
    /// * `AppTimeout` - the context was not fetched in time.
    pub async fn open(&self, app: &str, context: Option<Value>) -> Result<AppIdentifier> {
        let definition = self
            .inner
            .directory
            .get(app)
            .ok_or_else(|| Error::not_found(format!("no application '{}'", app)))?;

        let Some(context) = context else {
            let instance = self
                .inner
                .launcher
                .start(definition, None, LaunchOptions::default())
                .await?;
            info!(app, instance = %instance.id, "opened");
            return Ok(AppIdentifier::instance(&instance));
        };
        let context_type = validate_context(&context)?.to_string();

        let method = format!("{}{}", OPEN_CONTEXT_PREFIX, Uuid::new_v4());
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let served = context.clone();
        let registration = self
            .inner
            .transport
            .register(&method, move |invocation: Invocation| {
                let tx = tx.clone();
                let context = served.clone();
                async move {
                    debug!(caller = %invocation.caller.id, "opening context fetched");
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(());
                    }
                    Ok::<_, Error>(context)
                }
            })?;

        let options = LaunchOptions {
            open_context: Some(OpenContextRequest {
                instance: self.instance().id,
                method: method.clone(),
                context_type,
            }),
        };
        let wait = self.inner.config.open_context_timeout();
        let outcome: Result<Instance> = async {
            let instance = self
                .inner
                .launcher
                .start(definition, Some(context), options)
                .await?;
            match timeout(wait, rx).await {
                Ok(Ok(())) => Ok(instance),
                Ok(Err(_)) => Err(Error::state("opening context method went away")),
                Err(_) => Err(Error::app_timeout(format!(
                    "'{}' did not fetch its opening context within {:?}",
                    app, wait
                ))),
            }
        }
        .await;

        registration.unregister();
        debug!(method, "opening context method released");

        match outcome {
            Ok(instance) => {
                info!(app, instance = %instance.id, "opened with context");
                Ok(AppIdentifier::instance(&instance))
            }
            Err(e) => {
                warn!(app, error = %e, "open failed");
                Err(e)
            }
        }
    }

    /// Listen for contexts on the current user channel.
    ///
    /// If this instance was opened with a context of a matching type, the
    /// first such listener also receives that context, fetched from the
    /// opener.
    pub fn add_context_listener<F>(
        &self,
        context_type: Option<&str>,
        handler: F,
    ) -> Result<UserChannelListener>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let on_channel = handler.clone();
        let listener = self
            .inner
            .channels
            .add_context_listener(context_type, move |context| on_channel(context))?;

        let request = {
            let mut startup = self.inner.startup.lock();
            if startup.as_ref().is_some_and(|r| r.matches(context_type)) {
                startup.take()
            } else {
                None
            }
        };
        if let Some(request) = request {
            let transport = self.inner.transport.clone();
            tokio::spawn(async move {
                match transport
                    .invoke(&request.method, Value::Null, Target::Instance(request.instance))
                    .await
                {
                    Ok(context) => handler(context),
                    Err(e) => {
                        warn!(method = %request.method, error = %e, "failed to fetch opening context")
                    }
                }
            });
        }
        Ok(listener)
    }

    async fn choose(
        &self,
        context: &Value,
        mut candidates: Vec<IntentCandidate>,
        target: Option<&AppIdentifier>,
    ) -> Result<IntentCandidate> {
        if candidates.len() == 1 || (target.is_some() && !candidates.is_empty()) {
            return Ok(candidates.swap_remove(0));
        }
        self.inner.policy.select(context, &candidates).await
    }

    fn dispatch(&self, intent: &str, context: Value, server: Instance) -> IntentResolution {
        let method = intent_method(intent);
        let transport = self.inner.transport.clone();
        let target = Target::Instance(server.id);
        debug!(intent, server = %server.id, "raising intent");
        let call = tokio::spawn(async move { transport.invoke(&method, context, target).await });
        let call = async move {
            call.await
                .unwrap_or_else(|e| Err(Error::handler(format!("intent call aborted: {}", e))))
        }
        .boxed();
        IntentResolution::new(
            AppIdentifier::instance(&server),
            intent,
            call,
            self.inner.channels.clone(),
        )
    }

    async fn cold_start_and_dispatch(
        &self,
        candidate: IntentCandidate,
        context: Value,
    ) -> Result<IntentResolution> {
        let server = self.cold_start(&candidate, &context).await?;
        Ok(self.dispatch(&candidate.intent, context, server))
    }

    /// Start `candidate.app` and wait for it to listen to
    /// `candidate.intent`.
    async fn cold_start(&self, candidate: &IntentCandidate, context: &Value) -> Result<Instance> {
        let app = self
            .inner
            .directory
            .get(&candidate.app)
            .ok_or_else(|| Error::not_found(format!("no application '{}'", candidate.app)))?;
        let method = intent_method(&candidate.intent);

        // Watch before launching so a fast listener is not missed.
        let mut watch = self.inner.registry.bus().watch_discovery();
        info!(app = %app.name, intent = %candidate.intent, "cold-starting application");
        let instance = match self
            .inner
            .launcher
            .start(app, Some(context.clone()), LaunchOptions::default())
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                watch.close();
                return Err(e);
            }
        };

        let registry = &self.inner.registry;
        let listening = async {
            if registry.servers(&method).iter().any(|s| s.id == instance.id) {
                return Ok(());
            }
            while let Some(event) = watch.next().await {
                if let DiscoveryEvent::ServerMethodAdded { server, method: added } = event {
                    if server.id == instance.id && added == method {
                        return Ok(());
                    }
                }
            }
            Err(Error::state("discovery stream closed"))
        };
        let wait = self.inner.config.intent_resolution_timeout();
        let outcome = timeout(wait, listening).await;
        watch.close();

        match outcome {
            Ok(Ok(())) => {
                debug!(app = %app.name, instance = %instance.id, "cold-started application is listening");
                Ok(instance)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(app = %app.name, intent = %candidate.intent, "cold-started application never listened");
                Err(Error::app_timeout(format!(
                    "'{}' did not listen for intent '{}' within {:?}",
                    app.name, candidate.intent, wait
                )))
            }
        }
    }
}

impl std::fmt::Debug for Intents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intents")
            .field("instance", &self.instance().id)
            .field("directory", &self.inner.directory.len())
            .finish()
    }
}
