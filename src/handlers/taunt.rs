//! Taunt handler: answers every message except the bot's own.

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::handler::{Handler, Matcher};
use crate::plugin::{Plugger, PluginSpec, Stopper};
use crate::response::Response;

const TAUNTS: &[&str] = &[
    "don't taunt the bot!",
    "I heard that.",
    "keep talking, I'm listening.",
];

/// Catch-all handler that taunts back. Uses the matcher capability to skip
/// messages posted by the bot itself.
#[derive(Debug)]
pub struct TauntHandler {
    nickname: String,
}

impl TauntHandler {
    /// Create a taunt handler that ignores messages from `nickname`.
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
        }
    }

    fn pick_taunt() -> &'static str {
        TAUNTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(TAUNTS[0])
    }
}

#[async_trait]
impl Handler for TauntHandler {
    fn name(&self) -> &str {
        "taunt"
    }

    // Catch-all: the matcher below decides instead.
    fn pattern(&self) -> &str {
        ""
    }

    async fn run(&self, res: &Response) -> anyhow::Result<()> {
        let msg = res.message();
        res.send(format!("@{}: {}", msg.user, Self::pick_taunt()))?;
        Ok(())
    }

    fn matcher(&self) -> Option<&dyn Matcher> {
        Some(self)
    }
}

impl Matcher for TauntHandler {
    fn matches(&self, res: &Response) -> bool {
        res.message().user != self.nickname
    }
}

struct TauntPlugin;

impl Stopper for TauntPlugin {
    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Plugin specification wiring the taunt feature into the service
/// lifecycle.
pub fn plugin_spec() -> PluginSpec {
    PluginSpec {
        name: "taunt".to_string(),
        help: "Command people to respect the bot!".to_string(),
        start: |_plugger: Plugger| Box::new(TauntPlugin),
    }
}
