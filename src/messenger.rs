//! Rate-limited outbound delivery.
//!
//! The messenger keeps one bounded FIFO queue per destination. The first
//! send to a destination spawns a dedicated delivery task which lives until
//! shutdown; the task forwards queued messages to the adapter one at a
//! time, consuming a token from the shared rate limiter per send. Enqueue
//! order is preserved per destination; across destinations there is no
//! ordering guarantee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapter::Adapter;
use crate::event::OutgoingMessage;
use crate::limiter::RateLimiter;

/// Default capacity of each per-destination queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Errors surfaced to callers of [`Messenger::send`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The destination queue is full; the message was not enqueued.
    #[error("delivery queue full for destination {destination}")]
    QueueFull {
        /// Destination whose queue rejected the message.
        destination: String,
    },

    /// The messenger has been closed.
    #[error("messenger is closed")]
    Closed,
}

/// Delivers outgoing messages through the adapter under a global rate
/// limit, preserving per-destination FIFO order.
pub struct Messenger {
    adapter: Arc<dyn Adapter>,
    limiter: Arc<RateLimiter>,
    queues: RwLock<HashMap<String, mpsc::Sender<OutgoingMessage>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
    closed: AtomicBool,
}

impl Messenger {
    /// Create a messenger feeding the given adapter.
    pub fn new(adapter: Arc<dyn Adapter>, limiter: Arc<RateLimiter>, capacity: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            adapter,
            limiter,
            queues: RwLock::new(HashMap::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message for its destination.
    ///
    /// Never blocks beyond enqueue time. The queue (and its delivery task)
    /// is created on first send to a destination. Errors only when the
    /// queue is full or the messenger is closed.
    pub fn send(&self, msg: OutgoingMessage) -> Result<(), DeliveryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::Closed);
        }

        // Fast path: destination already has a queue.
        if let Some(tx) = self
            .queues
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&msg.channel)
        {
            return enqueue(tx, msg);
        }

        // Slow path: create the queue under the write lock. Double-checked,
        // so at most one queue ever exists per destination.
        let tx = {
            let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
            match queues.get(&msg.channel) {
                Some(tx) => tx.clone(),
                None => {
                    let (tx, rx) = mpsc::channel(self.capacity);
                    debug!(destination = %msg.channel, "starting delivery task");
                    let handle = tokio::spawn(deliver_loop(
                        msg.channel.clone(),
                        rx,
                        Arc::clone(&self.adapter),
                        Arc::clone(&self.limiter),
                        self.shutdown_tx.subscribe(),
                    ));
                    self.tasks
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(handle);
                    queues.insert(msg.channel.clone(), tx.clone());
                    tx
                }
            }
        };
        enqueue(&tx, msg)
    }

    /// Number of destinations with a live delivery task.
    pub fn active_destinations(&self) -> usize {
        self.queues.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Signal all delivery tasks and wait for them to exit.
    ///
    /// Messages still queued are dropped; there is no durability guarantee
    /// across shutdown.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "delivery task ended abnormally");
            }
        }
        self.queues.write().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("messenger closed");
    }
}

fn enqueue(tx: &mpsc::Sender<OutgoingMessage>, msg: OutgoingMessage) -> Result<(), DeliveryError> {
    use mpsc::error::TrySendError;
    match tx.try_send(msg) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(rejected)) => Err(DeliveryError::QueueFull {
            destination: rejected.channel,
        }),
        Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
    }
}

/// Delivery task for one destination.
///
/// Suspends on queue-empty, rate-limiter token, or shutdown signal. On
/// shutdown it exits immediately without draining unsent items.
async fn deliver_loop(
    destination: String,
    mut rx: mpsc::Receiver<OutgoingMessage>,
    adapter: Arc<dyn Adapter>,
    limiter: Arc<RateLimiter>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            maybe = rx.recv() => {
                let Some(msg) = maybe else { break };
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    () = limiter.acquire() => {
                        if let Err(e) = adapter.send(msg).await {
                            warn!(destination = %destination, error = %e, "adapter send failed");
                        }
                    }
                }
            }
        }
    }
    debug!(destination = %destination, "delivery task stopped");
}
