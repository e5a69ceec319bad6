//! Fatal platform errors trigger self-shutdown.

use std::sync::Arc;
use std::time::Duration;

use armitage::handler::HandlerRegistry;
use armitage::plugin::PluginRegistry;
use armitage::service::{DispatchState, Service};

use crate::support::{error_event, message_event, test_config, MockAdapter, RecordingHandler};

#[tokio::test(start_paused = true)]
async fn fatal_error_event_shuts_the_service_down() {
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

    adapter.feed(error_event(true)).await;

    let mut done = service.done();
    tokio::time::timeout(Duration::from_secs(5), done.changed())
        .await
        .expect("service should close itself on a fatal error")
        .expect("done channel alive");

    assert_eq!(service.report().state, DispatchState::Closed);
    assert!(adapter.is_closed());
}

#[tokio::test(start_paused = true)]
async fn non_fatal_error_keeps_the_service_running() {
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

    adapter.feed(error_event(false)).await;
    adapter.feed(message_event("U1", "C1", "still here")).await;

    // Dispatch continues past the recoverable error.
    tokio::time::timeout(Duration::from_secs(5), runs.recv())
        .await
        .expect("dispatch should survive a non-fatal error")
        .expect("runs stream open");
    assert_eq!(service.report().state, DispatchState::Running);

    service.close().await;
}
