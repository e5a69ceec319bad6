//! Internal event model.
//!
//! The adapter classifies every raw platform notification into an [`Event`]
//! exactly once, at the connection boundary. Downstream code matches on
//! [`EventVariant`] only and never inspects the raw payload's shape again.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A classified unit of platform activity.
///
/// Created by the adapter when wrapping a raw notification, consumed exactly
/// once by the event service. Not persisted.
#[derive(Debug, Clone)]
pub struct Event {
    /// Platform tag for the event, e.g. `"message"` or `"hello"`.
    pub kind: String,
    /// The original payload as received from the gateway. Opaque to
    /// everything past the adapter; kept for logging only.
    pub raw: serde_json::Value,
    /// Classification, computed once at adapter-wrap time.
    pub variant: EventVariant,
}

/// Closed set of event classifications.
#[derive(Debug, Clone)]
pub enum EventVariant {
    /// Platform event we do not recognize.
    Unknown,
    /// Protocol-level error notice.
    Error {
        /// Whether the error is unrecoverable (e.g. invalid credentials)
        /// and must terminate the service.
        fatal: bool,
    },
    /// Connection attempt in progress.
    Connecting,
    /// Connection established.
    Connected,
    /// Platform greeting after connect.
    Hello,
    /// Periodic latency measurement.
    LatencyReport,
    /// An inbound chat message.
    Message(Arc<IncomingMessage>),
}

impl EventVariant {
    /// Short tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            EventVariant::Unknown => "unknown",
            EventVariant::Error { .. } => "error",
            EventVariant::Connecting => "connecting",
            EventVariant::Connected => "connected",
            EventVariant::Hello => "hello",
            EventVariant::LatencyReport => "latency_report",
            EventVariant::Message(_) => "message",
        }
    }
}

/// A normalized inbound chat message.
///
/// Immutable once constructed; shared read-only with every matched handler
/// through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Message-type tag from the platform (usually `"message"`).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Sender id.
    pub user: String,
    /// Destination (channel) id the message was posted in.
    pub channel: String,
    /// Message text.
    pub text: String,
}

/// A normalized outbound message.
///
/// Ownership transfers to the messenger on send; the value is dropped after
/// delivery to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Destination (channel) id.
    pub channel: String,
    /// Message text.
    pub text: String,
}

impl OutgoingMessage {
    /// Build an outbound message for a destination.
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
        }
    }
}
