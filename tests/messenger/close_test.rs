//! Messenger shutdown behavior.

use std::sync::Arc;

use armitage::event::OutgoingMessage;
use armitage::limiter::RateLimiter;
use armitage::messenger::{DeliveryError, Messenger};

use crate::support::MockAdapter;

#[tokio::test(start_paused = true)]
async fn send_after_close_fails_fast() {
    let (adapter, _sent) = MockAdapter::new();
    let limiter = Arc::new(RateLimiter::new(1.0));
    let messenger = Messenger::new(adapter, limiter, 10);

    messenger.close().await;

    let err = messenger
        .send(OutgoingMessage::new("C1", "too late"))
        .expect_err("closed messenger must reject sends");
    assert!(matches!(err, DeliveryError::Closed));
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent() {
    let (adapter, _sent) = MockAdapter::new();
    let limiter = Arc::new(RateLimiter::new(1.0));
    let messenger = Messenger::new(adapter, limiter, 10);

    messenger
        .send(OutgoingMessage::new("C1", "queued"))
        .expect("enqueue");
    messenger.close().await;
    messenger.close().await;
    assert_eq!(messenger.active_destinations(), 0);
}

#[tokio::test(start_paused = true)]
async fn close_does_not_wait_for_unsent_items() {
    let (adapter, _sent) = MockAdapter::new();
    // Effectively frozen limiter: queued items would take hours to drain.
    let limiter = Arc::new(RateLimiter::new(0.0001));
    let messenger = Messenger::new(adapter, limiter, 10);

    for i in 0..5 {
        messenger
            .send(OutgoingMessage::new("C1", format!("msg-{i}")))
            .expect("enqueue");
    }

    // Must return promptly despite the full queue; queued messages are
    // dropped, not delivered.
    tokio::time::timeout(std::time::Duration::from_secs(5), messenger.close())
        .await
        .expect("close must not wait for the queue to drain");
}
