//! Armitage service binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use armitage::adapter::gateway::GatewayAdapter;
use armitage::config::Config;
use armitage::handler::HandlerRegistry;
use armitage::handlers::{self, taunt};
use armitage::plugin::PluginRegistry;
use armitage::service::Service;

#[derive(Parser)]
#[command(name = "armitage", version, about = "Rate-limited chat bot runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot service until interrupted.
    Start,
    /// Validate the configuration and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig => {
            armitage::logging::init_cli();
            let config = Config::load().context("failed to load configuration")?;
            config.validate()?;
            info!("configuration is valid");
            Ok(())
        }
        Command::Start => start().await,
    }
}

async fn start() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let _logging_guard = armitage::logging::init_service(config.service.logs_dir.as_deref())?;
    config.validate()?;

    info!(version = env!("CARGO_PKG_VERSION"), "armitage starting");

    let adapter = Arc::new(GatewayAdapter::new(
        config.adapter.base_url.clone(),
        config.adapter.token.clone(),
    ));

    let registry = Arc::new(HandlerRegistry::new());
    registry
        .register(Arc::new(handlers::PingHandler))
        .context("failed to register ping handler")?;
    registry
        .register(Arc::new(handlers::TauntHandler::new(
            config.adapter.nickname.clone(),
        )))
        .context("failed to register taunt handler")?;

    let mut plugins = PluginRegistry::new();
    plugins
        .register(taunt::plugin_spec())
        .context("failed to register taunt plugin")?;

    let service = Service::start(&config, adapter, registry, plugins)
        .await
        .context("service could not be started")?;

    // Signal loop: SIGINT/SIGTERM begin shutdown, SIGUSR1 reports status.
    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).context("install SIGUSR1 handler")?;
    let mut done = service.done();

    info!("listening for signals");
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("SIGINT received, initializing clean shutdown");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initializing clean shutdown");
                break;
            }
            _ = sigusr1.recv() => {
                let report = service.report();
                info!(
                    state = ?report.state,
                    active_destinations = report.active_destinations,
                    in_flight_units = report.in_flight_units,
                    registered_handlers = report.registered_handlers,
                    uptime_secs = report.uptime.as_secs(),
                    started_at = %report.started_at.to_rfc3339(),
                    "status report"
                );
            }
            _ = done.changed() => {
                // Internal shutdown, e.g. fatal platform error.
                error!("service stopped on its own");
                return Ok(());
            }
        }
    }

    let close_started = tokio::time::Instant::now();
    let closer = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.close().await })
    };

    let ceiling = Duration::from_secs(config.service.shutdown_timeout_secs);
    tokio::select! {
        _ = done.changed() => {
            info!(took_ms = close_started.elapsed().as_millis() as u64, "shutdown completed");
        }
        _ = sigint.recv() => {
            warn!("second signal received, initializing hard shutdown");
        }
        _ = tokio::time::sleep(ceiling) => {
            warn!(ceiling_secs = ceiling.as_secs(), "time limit reached, initializing hard shutdown");
        }
    }
    closer.abort();

    Ok(())
}
