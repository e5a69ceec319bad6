//! Platform adapter boundary.
//!
//! The adapter owns the live connection to the messaging platform. Everything
//! else in the runtime talks to the platform through this trait: handlers
//! never reach the raw connection directly.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::{Event, OutgoingMessage};

pub mod gateway;

/// Errors surfaced by an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Credential validation failed. Fatal at startup, never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The adapter has been closed; sends fail fast.
    #[error("adapter is closed")]
    Closed,

    /// Transport-level failure talking to the platform.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The platform answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Abstraction over the live platform connection.
///
/// Contract:
/// - `connect` validates credentials before returning; a credential failure
///   is a fatal startup error.
/// - `events` yields the live inbound event receiver exactly once. The
///   sequence is continuous and non-restartable; a second call returns
///   `None`.
/// - After `close` returns, no further events are produced and `send`
///   fails fast with [`AdapterError::Closed`].
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Open the connection and validate credentials.
    async fn connect(&self) -> Result<(), AdapterError>;

    /// Deliver one outbound message to the platform.
    async fn send(&self, msg: OutgoingMessage) -> Result<(), AdapterError>;

    /// Take the inbound event receiver. `None` if already taken.
    fn events(&self) -> Option<mpsc::Receiver<Event>>;

    /// Stop all adapter-owned background activity and wait for it.
    async fn close(&self);
}
