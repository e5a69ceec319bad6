//! Per-invocation response object handed to handlers.

use std::sync::Arc;

use crate::event::{IncomingMessage, OutgoingMessage};
use crate::messenger::{DeliveryError, Messenger};

/// Binds a handler invocation to the triggering message and the outbound
/// send path.
///
/// Created fresh per dispatch and discarded after the handler returns. The
/// underlying message is shared read-only with every concurrently running
/// handler.
#[derive(Clone)]
pub struct Response {
    msg: Arc<IncomingMessage>,
    captures: Vec<String>,
    messenger: Arc<Messenger>,
}

impl Response {
    /// Create a response for one handler invocation.
    pub fn new(msg: Arc<IncomingMessage>, captures: Vec<String>, messenger: Arc<Messenger>) -> Self {
        Self {
            msg,
            captures,
            messenger,
        }
    }

    /// The message that triggered this invocation.
    pub fn message(&self) -> &IncomingMessage {
        &self.msg
    }

    /// The message text, for convenience.
    pub fn text(&self) -> &str {
        &self.msg.text
    }

    /// Capture groups of the first full pattern match. Group 0 is the full
    /// match; empty for catch-all handlers.
    pub fn matches(&self) -> &[String] {
        &self.captures
    }

    /// Reply into the channel the message came from.
    ///
    /// Enqueues only; delivery happens asynchronously under the global rate
    /// limit.
    pub fn send(&self, text: impl Into<String>) -> Result<(), DeliveryError> {
        self.messenger
            .send(OutgoingMessage::new(self.msg.channel.clone(), text))
    }

    /// Send a message to an arbitrary destination.
    pub fn send_to(
        &self,
        channel: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), DeliveryError> {
        self.messenger.send(OutgoingMessage::new(channel, text))
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("channel", &self.msg.channel)
            .field("captures", &self.captures)
            .finish()
    }
}
