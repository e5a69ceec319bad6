//! HTTP gateway adapter.
//!
//! Talks to the platform through a bridge process exposing a small HTTP API:
//! `GET /auth/test` for credential validation, `GET /events/poll` for
//! long-polled inbound events, and `POST /messages` for sends. The relay
//! task reconnects with capped exponential backoff on transport errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Adapter, AdapterError};
use crate::event::{Event, EventVariant, IncomingMessage, OutgoingMessage};

/// HTTP connect timeout for the gateway client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Long-poll request timeout. The bridge holds the poll open until events
/// arrive or this expires.
const POLL_TIMEOUT_SECS: u64 = 60;

/// Capacity of the inbound event channel between relay task and consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Maximum reconnect backoff after transport errors (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Response envelope from the bridge HTTP API.
#[derive(Debug, Deserialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Adapter backed by the HTTP gateway bridge.
pub struct GatewayAdapter {
    http: reqwest::Client,
    base_url: String,
    token: String,
    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    shutdown_tx: watch::Sender<bool>,
    relay: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl GatewayAdapter {
    /// Create an adapter pointing at the given bridge base URL.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_tx,
            relay: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Adapter for GatewayAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        let url = format!("{}/auth/test", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED
            || resp.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(AdapterError::Auth(format!(
                "gateway rejected credentials ({})",
                resp.status()
            )));
        }
        let body: BridgeResponse = resp.json().await?;
        if !body.ok {
            return Err(AdapterError::Auth(
                body.error.unwrap_or_else(|| "auth test failed".to_string()),
            ));
        }

        info!(url = %self.base_url, "gateway credentials accepted");

        let handle = spawn_relay(
            self.http.clone(),
            format!("{}/events/poll", self.base_url),
            self.token.clone(),
            self.events_tx.clone(),
            self.shutdown_tx.subscribe(),
        );
        *self.relay.lock().await = Some(handle);
        Ok(())
    }

    async fn send(&self, msg: OutgoingMessage) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::Closed);
        }
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&msg)
            .send()
            .await?;
        let body: BridgeResponse = resp.json().await?;
        if !body.ok {
            return Err(AdapterError::Protocol(
                body.error.unwrap_or_else(|| "send rejected".to_string()),
            ));
        }
        debug!(channel = %msg.channel, "message delivered to gateway");
        Ok(())
    }

    fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.events_rx
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.relay.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "relay task ended abnormally");
            }
        }
        info!("gateway adapter closed");
    }
}

/// Spawn the relay task that long-polls the bridge and forwards wrapped
/// events into the channel.
fn spawn_relay(
    http: reqwest::Client,
    poll_url: String,
    token: String,
    events_tx: mpsc::Sender<Event>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff_ms: u64 = 1000;
        loop {
            let poll = poll_once(&http, &poll_url, &token, &events_tx);
            tokio::select! {
                result = poll => match result {
                    Ok(PollOutcome::Delivered) => {
                        backoff_ms = 1000;
                    }
                    Ok(PollOutcome::ReceiverGone) => {
                        debug!("event receiver dropped, relay exiting");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, backoff_ms, "event poll failed, backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                            _ = shutdown_rx.changed() => return,
                        }
                        backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                    }
                },
                _ = shutdown_rx.changed() => {
                    debug!("relay task shutting down");
                    return;
                }
            }
        }
    })
}

enum PollOutcome {
    Delivered,
    ReceiverGone,
}

/// Run one long-poll cycle and forward the returned events.
async fn poll_once(
    http: &reqwest::Client,
    poll_url: &str,
    token: &str,
    events_tx: &mpsc::Sender<Event>,
) -> Result<PollOutcome, AdapterError> {
    let resp = http.get(poll_url).bearer_auth(token).send().await;
    let resp = match resp {
        Ok(r) => r,
        // A long-poll timeout is the idle case, not an error.
        Err(e) if e.is_timeout() => return Ok(PollOutcome::Delivered),
        Err(e) => return Err(e.into()),
    };
    if !resp.status().is_success() {
        return Err(AdapterError::Protocol(format!(
            "event poll returned {}",
            resp.status()
        )));
    }

    let payloads: Vec<serde_json::Value> = resp.json().await?;
    for raw in payloads {
        let event = wrap_event(raw);
        debug!(kind = %event.kind, variant = event.variant.tag(), "event received");
        if events_tx.send(event).await.is_err() {
            return Ok(PollOutcome::ReceiverGone);
        }
    }
    Ok(PollOutcome::Delivered)
}

/// Classify one raw gateway payload into an [`Event`].
///
/// This is the only place a variant is assigned; downstream code never
/// reclassifies.
pub fn wrap_event(raw: serde_json::Value) -> Event {
    let kind = raw
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let variant = match kind.as_str() {
        "connecting" => EventVariant::Connecting,
        "connected" => EventVariant::Connected,
        "hello" => EventVariant::Hello,
        "latency_report" => EventVariant::LatencyReport,
        "message" => match serde_json::from_value::<IncomingMessage>(raw.clone()) {
            Ok(msg) => EventVariant::Message(Arc::new(msg)),
            Err(e) => {
                warn!(error = %e, "malformed message event");
                EventVariant::Unknown
            }
        },
        "invalid_auth" => EventVariant::Error { fatal: true },
        "error" | "disconnected" | "ack_error" | "message_too_long" | "outgoing_error" => {
            EventVariant::Error { fatal: false }
        }
        _ => EventVariant::Unknown,
    };

    Event { kind, raw, variant }
}
