//! Startup and graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use armitage::handler::{Handler, HandlerRegistry};
use armitage::plugin::{Plugger, PluginRegistry, PluginSpec, Stopper};
use armitage::response::Response;
use armitage::service::{DispatchState, Service};

use crate::support::{message_event, test_config, MockAdapter, RecordingHandler};

/// Handler that answers every ping with a reply through the messenger.
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    fn pattern(&self) -> &str {
        "(?i)ping"
    }

    async fn run(&self, res: &Response) -> anyhow::Result<()> {
        res.send("PONG")?;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn startup_fails_on_invalid_credentials() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (adapter, _sent) = MockAdapter::failing_auth();

    let result = Service::start(
        &test_config(&dir),
        adapter as _,
        Arc::new(HandlerRegistry::new()),
        PluginRegistry::new(),
    )
    .await;

    assert!(result.is_err(), "bad credentials must abort startup");
}

#[tokio::test(start_paused = true)]
async fn replies_flow_through_the_messenger_to_the_adapter() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (adapter, mut sent) = MockAdapter::new();

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(EchoHandler)).expect("register");

    let service = Service::start(
        &test_config(&dir),
        Arc::clone(&adapter) as _,
        registry,
        PluginRegistry::new(),
    )
    .await
    .expect("start");

    adapter.feed(message_event("U1", "C1", "ping")).await;

    let record = tokio::time::timeout(Duration::from_secs(5), sent.recv())
        .await
        .expect("reply should have been delivered")
        .expect("sent stream open");
    assert_eq!(record.msg.channel, "C1");
    assert_eq!(record.msg.text, "PONG");

    service.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_stops_everything_and_fires_done_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (adapter, _sent) = MockAdapter::new();

    let registry = Arc::new(HandlerRegistry::new());
    let (recorder, mut runs) = RecordingHandler::new("witness", "");
    registry.register(recorder).expect("register");

    let service = Service::start(
        &test_config(&dir),
        Arc::clone(&adapter) as _,
        registry,
        PluginRegistry::new(),
    )
    .await
    .expect("start");
    assert_eq!(service.report().state, DispatchState::Running);

    adapter.feed(message_event("U1", "C1", "hi")).await;
    runs.recv().await.expect("handler ran");

    let mut done = service.done();
    assert!(!*done.borrow());

    service.close().await;

    assert!(*done.borrow_and_update(), "done fires during close");
    assert_eq!(service.report().state, DispatchState::Closed);
    assert!(adapter.is_closed(), "adapter closed during teardown");

    // A second close returns immediately without firing done again.
    service.close().await;
    assert!(!done.has_changed().expect("done channel alive"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_closers_all_observe_full_shutdown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (adapter, _sent) = MockAdapter::new();

    let service = Service::start(
        &test_config(&dir),
        Arc::clone(&adapter) as _,
        Arc::new(HandlerRegistry::new()),
        PluginRegistry::new(),
    )
    .await
    .expect("start");

    let racer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.close().await })
    };
    service.close().await;
    racer.await.expect("racer completed");

    assert_eq!(service.report().state, DispatchState::Closed);
    assert!(adapter.is_closed());
}

static PLUGIN_STOPPED: AtomicBool = AtomicBool::new(false);

fn start_tracked(_plugger: Plugger) -> Box<dyn Stopper> {
    struct Tracked;
    impl Stopper for Tracked {
        fn stop(&mut self) -> anyhow::Result<()> {
            PLUGIN_STOPPED.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
    Box::new(Tracked)
}

#[tokio::test(start_paused = true)]
async fn plugins_are_stopped_during_close() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (adapter, _sent) = MockAdapter::new();

    let mut plugins = PluginRegistry::new();
    plugins
        .register(PluginSpec {
            name: "tracked".to_string(),
            help: "test plugin".to_string(),
            start: start_tracked,
        })
        .expect("register plugin");

    let service = Service::start(
        &test_config(&dir),
        Arc::clone(&adapter) as _,
        Arc::new(HandlerRegistry::new()),
        plugins,
    )
    .await
    .expect("start");

    assert!(!PLUGIN_STOPPED.load(Ordering::SeqCst));
    service.close().await;
    assert!(PLUGIN_STOPPED.load(Ordering::SeqCst), "stopper invoked on close");
}
