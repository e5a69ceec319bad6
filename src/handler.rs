//! Handler contract and registry.
//!
//! Handlers are registered once at startup into an ordered list. For each
//! inbound message every matching handler runs — matching never
//! short-circuits. A handler's pattern is compiled to a regex at
//! registration time and is immutable afterwards; an empty pattern is a
//! catch-all.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::response::Response;

/// Handler registration errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The handler's pattern is not a valid regular expression.
    #[error("invalid pattern {pattern:?} for handler {name:?}: {source}")]
    InvalidPattern {
        /// Handler name.
        name: String,
        /// The offending pattern.
        pattern: String,
        /// Underlying regex error.
        source: regex::Error,
    },
}

/// The contract every handler implements.
///
/// The minimal shape is a pattern plus a run function; `usage` (help text)
/// and the [`Matcher`] capability are optional extensions.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handler name, used in log lines.
    fn name(&self) -> &str;

    /// Human-readable help text surfaced by a help command. Empty by
    /// default.
    fn usage(&self) -> &str {
        ""
    }

    /// Regular expression deciding which messages this handler sees.
    /// Empty means every message.
    fn pattern(&self) -> &str;

    /// Handle one matched message. Errors are logged by the dispatcher and
    /// never affect sibling handlers.
    async fn run(&self, res: &Response) -> anyhow::Result<()>;

    /// Optional matcher capability, queried once per dispatch. When
    /// present, the handler is skipped unless the matcher accepts the
    /// response.
    fn matcher(&self) -> Option<&dyn Matcher> {
        None
    }
}

/// Optional extension letting a handler veto its own invocation by
/// inspecting the response.
pub trait Matcher: Send + Sync {
    /// Whether the handler should run for this response.
    fn matches(&self, res: &Response) -> bool;
}

struct RegisteredHandler {
    handler: Arc<dyn Handler>,
    // None for the catch-all (empty) pattern.
    regex: Option<Regex>,
}

/// A handler selected for a message, together with the capture groups of
/// the first full pattern match (group 0 included).
pub struct MatchedHandler {
    /// The registered handler.
    pub handler: Arc<dyn Handler>,
    /// Capture groups; empty for catch-all handlers.
    pub captures: Vec<String>,
}

/// Ordered, append-only collection of registered handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<Vec<Arc<RegisteredHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Registration order determines dispatch order.
    pub fn register(&self, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let pattern = handler.pattern();
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
                    name: handler.name().to_string(),
                    pattern: pattern.to_string(),
                    source,
                })?,
            )
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(Arc::new(RegisteredHandler { handler, regex }));
        Ok(())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usage lines of all handlers that declare one, in registration order.
    pub fn usages(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| !e.handler.usage().is_empty())
            .map(|e| e.handler.usage().to_string())
            .collect()
    }

    /// All handlers matching `text`, in registration order, with captures
    /// from the first full match attached.
    pub fn matches(&self, text: &str) -> Vec<MatchedHandler> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter_map(|entry| match &entry.regex {
                None => Some(MatchedHandler {
                    handler: Arc::clone(&entry.handler),
                    captures: Vec::new(),
                }),
                Some(regex) => regex.captures(text).map(|caps| MatchedHandler {
                    handler: Arc::clone(&entry.handler),
                    captures: caps
                        .iter()
                        .map(|g| g.map(|m| m.as_str().to_string()).unwrap_or_default())
                        .collect(),
                }),
            })
            .collect()
    }
}
