//! Event dispatch and service supervision.
//!
//! [`EventService`] consumes the adapter's event stream and dispatches
//! message events to matching handlers, one isolated unit per event ×
//! handler, each bounded by a timeout and recovered at its join boundary.
//! [`Service`] wires the runtime together, owns the shutdown signal, and
//! sequences graceful teardown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapter::Adapter;
use crate::config::Config;
use crate::event::{Event, EventVariant};
use crate::handler::{Handler, HandlerRegistry};
use crate::limiter::RateLimiter;
use crate::messenger::Messenger;
use crate::plugin::{Plugger, PluginRegistry, Stopper};
use crate::response::Response;
use crate::store::Store;

/// Lifecycle states of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Created, not yet consuming events.
    Idle,
    /// Consuming events and spawning dispatch units.
    Running,
    /// Shutdown signaled; waiting for in-flight units.
    Draining,
    /// All tracked units completed or timed out.
    Closed,
}

/// Consumes classified events and runs matching handlers with isolation.
pub struct EventService {
    registry: Arc<HandlerRegistry>,
    messenger: Arc<Messenger>,
    handler_timeout: Duration,
    state_tx: watch::Sender<DispatchState>,
    in_flight: Arc<AtomicUsize>,
}

impl EventService {
    /// Create an idle event service.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        messenger: Arc<Messenger>,
        handler_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(DispatchState::Idle);
        Self {
            registry,
            messenger,
            handler_timeout,
            state_tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DispatchState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<DispatchState> {
        self.state_tx.subscribe()
    }

    /// Number of dispatch units currently running.
    pub fn in_flight_units(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Main dispatch loop.
    ///
    /// Reads events until the stream ends or shutdown is signaled, then
    /// drains in-flight units (each already bounded by its own timeout)
    /// before reporting `Closed`. A fatal error event requests shutdown
    /// through `shutdown_tx`.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<Event>,
        mut shutdown_rx: watch::Receiver<bool>,
        shutdown_tx: watch::Sender<bool>,
    ) {
        let _ = self.state_tx.send(DispatchState::Running);
        let mut units: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                maybe = events.recv() => match maybe {
                    None => {
                        info!("adapter event stream ended");
                        break;
                    }
                    Some(event) => self.dispatch(&mut units, event, &shutdown_tx),
                },
                // Reap finished units so the set does not grow unbounded.
                Some(result) = units.join_next(), if !units.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            warn!("dispatch unit panicked");
                        }
                    }
                }
            }
        }

        let _ = self.state_tx.send(DispatchState::Draining);
        debug!(remaining = units.len(), "draining dispatch units");
        while let Some(result) = units.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!("dispatch unit panicked");
                }
            }
        }
        let _ = self.state_tx.send(DispatchState::Closed);
    }

    /// Spawn the classification-specific action for one event.
    ///
    /// Message events fan out into one unit per matching handler so a slow
    /// or failing handler never blocks event intake or its siblings.
    fn dispatch(&self, units: &mut JoinSet<()>, event: Event, shutdown_tx: &watch::Sender<bool>) {
        match event.variant {
            EventVariant::Message(msg) => {
                let matched = self.registry.matches(&msg.text);
                debug!(
                    channel = %msg.channel,
                    handlers = matched.len(),
                    "message received"
                );
                for m in matched {
                    let response =
                        Response::new(Arc::clone(&msg), m.captures, Arc::clone(&self.messenger));
                    self.spawn_unit(units, m.handler, response);
                }
            }
            EventVariant::Error { fatal: true } => {
                error!(kind = %event.kind, "unrecoverable platform error, shutting down");
                let _ = shutdown_tx.send(true);
            }
            EventVariant::Error { fatal: false } => {
                warn!(kind = %event.kind, "platform error event");
            }
            EventVariant::Connecting => debug!("connection attempt"),
            EventVariant::Connected => info!("connected to platform"),
            EventVariant::Hello => info!("platform sent greetings"),
            EventVariant::LatencyReport => debug!("latency report"),
            EventVariant::Unknown => debug!(kind = %event.kind, "unknown event"),
        }
    }

    /// Spawn one isolated dispatch unit for a handler invocation.
    fn spawn_unit(&self, units: &mut JoinSet<()>, handler: Arc<dyn Handler>, response: Response) {
        // Capability query happens here, once per dispatch.
        if let Some(matcher) = handler.matcher() {
            if !matcher.matches(&response) {
                debug!(handler = handler.name(), "matcher declined message");
                return;
            }
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let timeout = self.handler_timeout;
        let name = handler.name().to_string();
        units.spawn(async move {
            let _guard = guard;
            run_handler(handler, name, response, timeout).await;
        });
    }
}

// Decrements the in-flight counter when a unit finishes, including when it
// panics or is dropped mid-flight.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run one handler with timeout and panic isolation.
///
/// The handler runs in its own task; on timeout the task is aborted, which
/// cancels it at its next await point. A handler stuck in synchronous code
/// cannot be preempted and leaks until it returns — accepted limitation.
async fn run_handler(handler: Arc<dyn Handler>, name: String, response: Response, timeout: Duration) {
    let task = tokio::spawn({
        let handler = Arc::clone(&handler);
        async move { handler.run(&response).await }
    });
    let abort = task.abort_handle();

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            warn!(handler = %name, error = %e, "handler returned error");
        }
        Ok(Err(join_err)) if join_err.is_panic() => {
            warn!(handler = %name, "handler panicked, recovered at unit boundary");
        }
        Ok(Err(_)) => {} // cancelled, nothing to report
        Err(_) => {
            warn!(
                handler = %name,
                timeout_secs = timeout.as_secs(),
                "handler timed out, abandoning unit"
            );
            abort.abort();
        }
    }
}

/// Status snapshot returned by [`Service::report`].
#[derive(Debug, Clone)]
pub struct ServiceReport {
    /// Dispatch loop lifecycle state.
    pub state: DispatchState,
    /// Destinations with a live delivery task.
    pub active_destinations: usize,
    /// Dispatch units currently running.
    pub in_flight_units: usize,
    /// Registered handlers.
    pub registered_handlers: usize,
    /// Time since the service started.
    pub uptime: Duration,
    /// Wall-clock start time.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// The running bot service.
///
/// Owns the top-level shutdown signal and sequences teardown: stop event
/// intake, drain dispatch units, stop plugins, close the messenger, close
/// the adapter, then fire the done signal exactly once.
pub struct Service {
    adapter: Arc<dyn Adapter>,
    messenger: Arc<Messenger>,
    store: Arc<Store>,
    registry: Arc<HandlerRegistry>,
    dispatch: Arc<EventService>,
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
    stoppers: std::sync::Mutex<Vec<(String, Box<dyn Stopper>)>>,
    started_at: Instant,
    started_at_utc: chrono::DateTime<chrono::Utc>,
    closing: AtomicBool,
}

impl Service {
    /// Start the service: open the store, validate credentials, wire the
    /// messenger and dispatch loop, and boot plugins.
    ///
    /// Returns once the service is ready. Store-open and credential
    /// failures are fatal and abort startup.
    pub async fn start(
        config: &Config,
        adapter: Arc<dyn Adapter>,
        registry: Arc<HandlerRegistry>,
        plugins: PluginRegistry,
    ) -> Result<Arc<Self>> {
        let store =
            Arc::new(Store::open(&config.database.path).context("failed to open store")?);

        adapter
            .connect()
            .await
            .context("failed to connect to platform")?;
        let events = adapter
            .events()
            .context("adapter event stream already taken")?;

        let limiter = Arc::new(RateLimiter::new(config.delivery.rate_per_sec));
        let messenger = Arc::new(Messenger::new(
            Arc::clone(&adapter),
            limiter,
            config.delivery.queue_capacity,
        ));
        let dispatch = Arc::new(EventService::new(
            Arc::clone(&registry),
            Arc::clone(&messenger),
            Duration::from_secs(config.dispatch.handler_timeout_secs),
        ));

        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);

        let run_handle = tokio::spawn(Arc::clone(&dispatch).run(
            events,
            shutdown_tx.subscribe(),
            shutdown_tx.clone(),
        ));

        let plugger = Plugger::new(Arc::clone(&messenger), Arc::clone(&store));
        let stoppers = plugins.start_all(&plugger);
        if !stoppers.is_empty() {
            info!(count = stoppers.len(), "plugins started");
        }

        let service = Arc::new(Self {
            adapter,
            messenger,
            store,
            registry,
            dispatch,
            shutdown_tx,
            done_tx,
            run_handle: Mutex::new(Some(run_handle)),
            stoppers: std::sync::Mutex::new(stoppers),
            started_at: Instant::now(),
            started_at_utc: chrono::Utc::now(),
            closing: AtomicBool::new(false),
        });

        // Close from inside when shutdown is requested internally (fatal
        // platform error) rather than by the caller.
        let weak = Arc::downgrade(&service);
        let mut shutdown_rx = service.shutdown_tx.subscribe();
        tokio::spawn(async move {
            if shutdown_rx.changed().await.is_ok() {
                if let Some(service) = weak.upgrade() {
                    service.close().await;
                }
            }
        });

        info!(handlers = service.registry.len(), "service ready");
        Ok(service)
    }

    /// Graceful shutdown. Blocks until fully stopped.
    ///
    /// Idempotent: concurrent calls wait for the first one to finish.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            let mut done = self.done_tx.subscribe();
            if !*done.borrow() {
                let _ = done.changed().await;
            }
            return;
        }

        info!("service closing");
        let _ = self.shutdown_tx.send(true);

        // Plugins stop while the dispatch loop drains.
        let stoppers: Vec<(String, Box<dyn Stopper>)> = self
            .stoppers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for (name, mut stopper) in stoppers {
            if let Err(e) = stopper.stop() {
                warn!(plugin = %name, error = %e, "plugin stop failed");
            }
        }

        if let Some(handle) = self.run_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch loop ended abnormally");
            }
        }

        self.messenger.close().await;
        self.adapter.close().await;

        let _ = self.done_tx.send(true);
        info!("service closed");
    }

    /// Signal that fires once the service has fully stopped.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Persistent store handle.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Status snapshot. No side effects.
    pub fn report(&self) -> ServiceReport {
        ServiceReport {
            state: self.dispatch.state(),
            active_destinations: self.messenger.active_destinations(),
            in_flight_units: self.dispatch.in_flight_units(),
            registered_handlers: self.registry.len(),
            uptime: self.started_at.elapsed(),
            started_at: self.started_at_utc,
        }
    }
}
