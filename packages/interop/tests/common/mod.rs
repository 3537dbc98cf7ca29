use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use interop::{
    Agent, AppDirectory, ApplicationDefinition, Core, Error, FirstRegistered, Instance,
    InstanceId, IntentDefinition, InteropConfig, LaunchOptions, Launcher, Result,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub type Setup = Arc<dyn Fn(Agent) + Send + Sync>;

/// Starts applications as agents on the same core and runs the setup
/// registered for the application, the way an application's own startup
/// code would.
pub struct CoreLauncher {
    core: Core,
    setups: Mutex<HashMap<String, Setup>>,
    agents: Mutex<Vec<Agent>>,
}

impl CoreLauncher {
    pub fn new(core: &Core) -> Arc<Self> {
        Arc::new(Self {
            core: core.clone(),
            setups: Mutex::new(HashMap::new()),
            agents: Mutex::new(Vec::new()),
        })
    }

    pub fn on_start(&self, app: &str, setup: impl Fn(Agent) + Send + Sync + 'static) {
        self.setups.lock().insert(app.to_string(), Arc::new(setup));
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.agents.lock().clone()
    }
}

#[async_trait]
impl Launcher for CoreLauncher {
    async fn start(
        &self,
        app: &ApplicationDefinition,
        _context: Option<Value>,
        options: LaunchOptions,
    ) -> Result<Instance> {
        let Some(setup) = self.setups.lock().get(&app.name).cloned() else {
            return Err(Error::state(format!("{} cannot be started", app.name)));
        };
        let agent = self
            .core
            .agent(&app.name)
            .policy(Arc::new(FirstRegistered))
            .startup(options.open_context)
            .connect()?;
        setup(agent.clone());
        let instance = agent.instance().clone();
        self.agents.lock().push(agent);
        Ok(instance)
    }

    async fn stop(&self, instance: InstanceId) -> Result<()> {
        let agent = self
            .agents
            .lock()
            .iter()
            .find(|agent| agent.instance().id == instance)
            .cloned();
        match agent {
            Some(agent) => {
                agent.close();
                Ok(())
            }
            None => Err(Error::not_found(format!("instance {}", instance))),
        }
    }
}

pub fn directory() -> AppDirectory {
    AppDirectory::new(vec![
        ApplicationDefinition::new("blotter").with_title("Trade Blotter"),
        ApplicationDefinition::new("chart")
            .with_title("Chart")
            .with_intent(IntentDefinition::new("ViewChart").with_contexts(["fdc3.instrument"])),
        ApplicationDefinition::new("chat").with_intent(
            IntentDefinition::new("StartChat")
                .with_contexts(["fdc3.contact"])
                .with_result_type("channel<fdc3.chat.message>"),
        ),
    ])
}

pub fn fast() -> InteropConfig {
    InteropConfig {
        intent_resolution_timeout_ms: 500,
        open_context_timeout_ms: 500,
        ..InteropConfig::default()
    }
}

pub fn instrument(ticker: &str) -> Value {
    json!({"type": "fdc3.instrument", "id": {"ticker": ticker}})
}
