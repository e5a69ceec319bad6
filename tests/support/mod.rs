//! Shared test fixtures: a channel-backed mock adapter, recording
//! handlers, and config helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use armitage::adapter::{Adapter, AdapterError};
use armitage::config::Config;
use armitage::event::{Event, EventVariant, IncomingMessage, OutgoingMessage};
use armitage::handler::{Handler, Matcher};
use armitage::response::Response;

/// One message the adapter was asked to deliver, with its delivery time.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub at: tokio::time::Instant,
    pub msg: OutgoingMessage,
}

/// In-memory adapter for tests. Events are fed through a channel; sends
/// are recorded with timestamps.
pub struct MockAdapter {
    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    sent_tx: mpsc::UnboundedSender<SentRecord>,
    closed: AtomicBool,
    fail_connect: bool,
}

impl MockAdapter {
    /// Build an adapter plus the stream of messages it delivers.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SentRecord>) {
        Self::with_connect_result(true)
    }

    /// Build an adapter whose `connect` fails with an auth error.
    pub fn failing_auth() -> (Arc<Self>, mpsc::UnboundedReceiver<SentRecord>) {
        Self::with_connect_result(false)
    }

    fn with_connect_result(ok: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<SentRecord>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let adapter = Arc::new(Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            sent_tx,
            closed: AtomicBool::new(false),
            fail_connect: !ok,
        });
        (adapter, sent_rx)
    }

    /// Feed one event into the adapter's stream.
    pub async fn feed(&self, event: Event) {
        self.events_tx.send(event).await.expect("event stream open");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        if self.fail_connect {
            return Err(AdapterError::Auth("bad credentials".to_string()));
        }
        Ok(())
    }

    async fn send(&self, msg: OutgoingMessage) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        let _ = self.sent_tx.send(SentRecord {
            at: tokio::time::Instant::now(),
            msg,
        });
        Ok(())
    }

    fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.events_rx
            .lock()
            .expect("events lock")
            .take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A message event as the gateway would classify it.
pub fn message_event(user: &str, channel: &str, text: &str) -> Event {
    Event {
        kind: "message".to_string(),
        raw: serde_json::json!({
            "type": "message",
            "user": user,
            "channel": channel,
            "text": text,
        }),
        variant: EventVariant::Message(Arc::new(IncomingMessage {
            kind: "message".to_string(),
            user: user.to_string(),
            channel: channel.to_string(),
            text: text.to_string(),
        })),
    }
}

/// An error event with the given severity.
pub fn error_event(fatal: bool) -> Event {
    Event {
        kind: if fatal { "invalid_auth" } else { "error" }.to_string(),
        raw: serde_json::Value::Null,
        variant: EventVariant::Error { fatal },
    }
}

/// Config suitable for tests: temp database, short handler timeout.
pub fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.adapter.token = "test-token".to_string();
    config.database.path = dir.path().join("test.db");
    config.dispatch.handler_timeout_secs = 1;
    config
}

/// What a recording handler observed for one invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub handler: String,
    pub captures: Vec<String>,
}

/// Handler that reports each invocation on a channel.
pub struct RecordingHandler {
    name: &'static str,
    pattern: &'static str,
    tx: mpsc::UnboundedSender<Invocation>,
}

impl RecordingHandler {
    pub fn new(
        name: &'static str,
        pattern: &'static str,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Invocation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { name, pattern, tx }), rx)
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn pattern(&self) -> &str {
        self.pattern
    }

    async fn run(&self, res: &Response) -> anyhow::Result<()> {
        let _ = self.tx.send(Invocation {
            handler: self.name.to_string(),
            captures: res.matches().to_vec(),
        });
        Ok(())
    }
}

/// Handler that panics on every message.
pub struct PanickingHandler;

#[async_trait]
impl Handler for PanickingHandler {
    fn name(&self) -> &str {
        "panicking"
    }

    fn pattern(&self) -> &str {
        ""
    }

    async fn run(&self, _res: &Response) -> anyhow::Result<()> {
        panic!("handler blew up");
    }
}

/// Handler that fails with an error on every message.
pub struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    fn pattern(&self) -> &str {
        ""
    }

    async fn run(&self, _res: &Response) -> anyhow::Result<()> {
        anyhow::bail!("handler refused")
    }
}

/// Handler that never returns.
pub struct StuckHandler;

#[async_trait]
impl Handler for StuckHandler {
    fn name(&self) -> &str {
        "stuck"
    }

    fn pattern(&self) -> &str {
        ""
    }

    async fn run(&self, _res: &Response) -> anyhow::Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Handler that only runs for a fixed user, via the matcher capability.
pub struct UserGatedHandler {
    allowed_user: String,
    tx: mpsc::UnboundedSender<Invocation>,
}

impl UserGatedHandler {
    pub fn new(allowed_user: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Invocation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                allowed_user: allowed_user.to_string(),
                tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl Handler for UserGatedHandler {
    fn name(&self) -> &str {
        "user-gated"
    }

    fn pattern(&self) -> &str {
        ""
    }

    async fn run(&self, res: &Response) -> anyhow::Result<()> {
        let _ = self.tx.send(Invocation {
            handler: "user-gated".to_string(),
            captures: res.matches().to_vec(),
        });
        Ok(())
    }

    fn matcher(&self) -> Option<&dyn Matcher> {
        Some(self)
    }
}

impl Matcher for UserGatedHandler {
    fn matches(&self, res: &Response) -> bool {
        res.message().user == self.allowed_user
    }
}
