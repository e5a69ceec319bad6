//! Liveness check handler.

use async_trait::async_trait;
use tracing::debug;

use crate::handler::Handler;
use crate::response::Response;

/// Replies "PONG" to any message containing "ping".
#[derive(Debug, Default)]
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    fn name(&self) -> &str {
        "ping"
    }

    fn usage(&self) -> &str {
        r#"ping - responds with "PONG""#
    }

    fn pattern(&self) -> &str {
        "(?i)ping"
    }

    async fn run(&self, res: &Response) -> anyhow::Result<()> {
        debug!(channel = %res.message().channel, "ping received");
        res.send("PONG")?;
        Ok(())
    }
}
