//! End-to-end flows between agents sharing one core.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{directory, fast, instrument, CoreLauncher};
use interop::{AppIdentifier, ChannelKind, Core, Error, InteropConfig, RejectAmbiguous};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out")
        .expect("sender dropped")
}

#[tokio::test]
async fn agent_requires_policy() {
    let core = Core::new(fast(), directory());
    let err = core.agent("blotter").connect().unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(core.registry().instances().is_empty());
}

#[tokio::test]
async fn close_removes_the_instance_once() {
    let core = Core::new(fast(), directory());
    let agent = core
        .agent("blotter")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();
    assert_eq!(core.registry().instances_of("blotter").len(), 1);

    assert!(agent.close());
    assert!(!agent.close());
    assert!(core.registry().instances_of("blotter").is_empty());
    assert!(matches!(
        agent.channels().join_user_channel("red").unwrap_err(),
        Error::State(_)
    ));
}

#[tokio::test]
async fn user_channel_broadcast_between_agents() {
    let core = Core::new(fast(), directory());
    let blotter = core
        .agent("blotter")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();
    let chart = core
        .agent("chart")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    chart
        .channels()
        .add_context_listener(Some("fdc3.instrument"), move |context| {
            let _ = tx.send(context);
        })
        .unwrap();
    chart.channels().join_user_channel("red").unwrap();
    blotter.channels().join_user_channel("red").unwrap();

    blotter.channels().broadcast(json!({"type": "fdc3.contact"})).unwrap();
    blotter.channels().broadcast(instrument("AAPL")).unwrap();
    assert_eq!(next(&mut rx).await, instrument("AAPL"));

    // A channel joined later replays what it already holds.
    blotter.channels().join_user_channel("blue").unwrap();
    blotter.channels().broadcast(instrument("MSFT")).unwrap();
    chart.channels().join_user_channel("blue").unwrap();
    assert_eq!(next(&mut rx).await, instrument("MSFT"));
}

#[tokio::test]
async fn open_hands_the_context_to_the_started_app() {
    let core = Core::new(fast(), directory());
    let launcher = CoreLauncher::new(&core);
    let (tx, mut rx) = mpsc::unbounded_channel();
    launcher.on_start("chart", move |agent| {
        let tx = tx.clone();
        agent
            .intents()
            .add_context_listener(Some("fdc3.instrument"), move |context| {
                let _ = tx.send(context);
            })
            .unwrap();
    });

    let blotter = core
        .agent("blotter")
        .policy(Arc::new(RejectAmbiguous))
        .launcher(launcher.clone())
        .connect()
        .unwrap();
    let opened = blotter
        .intents()
        .open("chart", Some(instrument("TSLA")))
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, instrument("TSLA"));
    let agents = launcher.agents();
    assert_eq!(agents.len(), 1);
    assert_eq!(opened, AppIdentifier::instance(agents[0].instance()));
}

#[tokio::test]
async fn raise_for_context_cold_starts_through_the_core() {
    let core = Core::new(fast(), directory());
    let launcher = CoreLauncher::new(&core);
    launcher.on_start("chart", |agent| {
        agent
            .intents()
            .add_intent_listener("ViewChart", |context: Value, caller| async move {
                Ok(json!({
                    "type": "chart.view",
                    "of": context["id"]["ticker"],
                    "for": caller.application,
                }))
            })
            .unwrap();
    });

    let blotter = core
        .agent("blotter")
        .policy(Arc::new(RejectAmbiguous))
        .launcher(launcher.clone())
        .connect()
        .unwrap();
    let resolution = blotter
        .intents()
        .raise_intent_for_context(instrument("IBM"), None)
        .await
        .unwrap();
    assert_eq!(resolution.intent(), "ViewChart");
    assert_eq!(resolution.source().app_id, "chart");

    let result = resolution.get_result().await.unwrap();
    assert_eq!(
        result.context(),
        Some(&json!({"type": "chart.view", "of": "IBM", "for": "blotter"}))
    );

    // The started instance is now live and is raised on directly.
    let again = blotter
        .intents()
        .raise_intent("ViewChart", instrument("IBM"), None)
        .await
        .unwrap();
    assert_eq!(again.source(), resolution.source());
    assert_eq!(launcher.agents().len(), 1);
}

#[tokio::test]
async fn private_channel_from_an_intent() {
    let core = Core::new(fast(), directory());
    let chat = core
        .agent("chat")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();
    let room = chat.channels().create_private_channel().unwrap();

    let (events, mut rx) = mpsc::unbounded_channel();
    let added = events.clone();
    room.on_add_context_listener(move |context_type| {
        let _ = added.send(format!("add {}", context_type.unwrap_or_default()));
    })
    .unwrap();
    let gone = events.clone();
    room.on_disconnect(move || {
        let _ = gone.send("disconnect".to_string());
    })
    .unwrap();

    let handed_out = room.clone();
    chat.intents()
        .add_intent_listener("StartChat", move |_, _| {
            let room = handed_out.clone();
            async move { Ok(room) }
        })
        .unwrap();

    let blotter = core
        .agent("blotter")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();
    let result = blotter
        .intents()
        .raise_intent("StartChat", json!({"type": "fdc3.contact", "name": "Jane"}), None)
        .await
        .unwrap()
        .get_result()
        .await
        .unwrap();
    let channel = result.channel().unwrap().clone();
    assert_eq!(channel.kind(), ChannelKind::Private);
    assert_eq!(channel.id(), room.id());

    let (tx, mut messages) = mpsc::unbounded_channel();
    channel
        .add_context_listener(Some("fdc3.chat.message"), move |context| {
            let _ = tx.send(context);
        })
        .unwrap();
    assert_eq!(next(&mut rx).await, "add fdc3.chat.message");

    let message = json!({"type": "fdc3.chat.message", "text": "hi"});
    room.broadcast(message.clone()).unwrap();
    assert_eq!(next(&mut messages).await, message);

    assert!(blotter.close());
    assert_eq!(next(&mut rx).await, "disconnect");
}

#[tokio::test]
async fn configured_system_channels() {
    let config = InteropConfig::from_json_str(
        r##"{"systemChannels": [{"id": "desk", "name": "Desk", "color": "#123456"}]}"##,
    )
    .unwrap();
    let core = Core::new(config, directory());
    let agent = core
        .agent("blotter")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();

    let ids: Vec<_> = agent
        .channels()
        .system_channels()
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, ["desk"]);
    assert!(agent.channels().get_system_channel("desk").is_ok());
    assert!(matches!(
        agent.channels().get_system_channel("red").unwrap_err(),
        Error::NotFound(_)
    ));
    assert_eq!(core.config().intents().open_context_timeout_ms, 10_000);
}

#[tokio::test]
async fn closed_agents_leave_no_documents_behind() {
    let core = Core::new(fast(), directory());
    let chat = core
        .agent("chat")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();
    let blotter = core
        .agent("blotter")
        .policy(Arc::new(RejectAmbiguous))
        .connect()
        .unwrap();

    let room = chat.channels().create_private_channel().unwrap();
    blotter.channels().claim_private_channel(room.id()).unwrap();
    chat.intents()
        .add_intent_listener("StartChat", |_, _| async { Ok(()) })
        .unwrap();
    assert_eq!(core.store().names().len(), 2);

    assert!(chat.close());
    assert!(blotter.close());
    assert!(core.registry().instances().is_empty());
    timeout(Duration::from_secs(1), async {
        while !core.store().names().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("documents outlived their instances");
}
