// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Best-effort notification dispatch.
//!
//! Notifications are sent only after the state change they describe has
//! committed, on a background task owned by [`Dispatcher`], so the caller
//! replies without waiting on the notification endpoint. Delivery is retried
//! a bounded number of times and then dropped with a warning; a failed
//! notification never changes the outcome of the operation that triggered it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Attempts per notification before it is dropped.
pub const MAX_ATTEMPTS: u32 = 3;

const RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Payment receipt for the paying user.
    PaymentConfirmed {
        user_id: String,
        order_id: String,
        amount_usd_cents: u64,
    },
    /// Operator alert: a booking is paid and awaits fulfilment.
    BookingPaidAlert { booking_id: String, order_id: String },
    /// Documents for a booking have been delivered to the user.
    BookingDelivered {
        user_id: String,
        booking_id: String,
        contact_email: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification endpoint returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Send with bounded retry. Returns whether delivery succeeded.
pub async fn deliver(notifier: &dyn Notifier, notification: Notification) -> bool {
    for attempt in 1..=MAX_ATTEMPTS {
        match notifier.send(&notification).await {
            Ok(()) => return true,
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(attempt, error = %e, "Notification failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(e) => {
                warn!(
                    attempts = MAX_ATTEMPTS,
                    error = %e,
                    notification = ?notification,
                    "Dropping notification after repeated failures"
                );
            }
        }
    }
    false
}

/// Runs deliveries off the request path.
///
/// Every spawned delivery is tracked so shutdown (and tests) can wait for
/// in-flight notifications with [`Dispatcher::drain`].
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            tasks: TaskTracker::new(),
        }
    }

    /// Deliver in the background. The handle resolves to the delivery result.
    pub fn dispatch(&self, notification: Notification) -> JoinHandle<bool> {
        let notifier = self.notifier.clone();
        self.tasks
            .spawn(async move { deliver(notifier.as_ref(), notification).await })
    }

    /// Deliver in the background, then hand the result to `then`.
    pub fn dispatch_then<F>(&self, notification: Notification, then: F) -> JoinHandle<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let notifier = self.notifier.clone();
        self.tasks.spawn(async move {
            let delivered = deliver(notifier.as_ref(), notification).await;
            then(delivered);
        })
    }

    /// Wait for every delivery spawned so far to finish.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("in_flight", &self.tasks.len())
            .finish()
    }
}

// =============================================================================
// Implementations
// =============================================================================

/// Writes notifications to the log. Used when no endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(notification = ?notification, "Notification dispatched");
        Ok(())
    }
}

/// POSTs each notification as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Records every notification; optionally fails the first N sends.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    attempts: Mutex<u32>,
    fail_first: u32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent().len()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.lock().map(|a| *a).unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let attempt = {
            let mut attempts = self
                .attempts
                .lock()
                .map_err(|_| NotifyError::Transport("lock poisoned".into()))?;
            *attempts += 1;
            *attempts
        };
        if attempt <= self.fail_first {
            return Err(NotifyError::Transport("simulated failure".into()));
        }
        self.sent
            .lock()
            .map_err(|_| NotifyError::Transport("lock poisoned".into()))?
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt() -> Notification {
        Notification::PaymentConfirmed {
            user_id: "u1".into(),
            order_id: "o1".into(),
            amount_usd_cents: 999,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let notifier = RecordingNotifier::failing_first(2);
        assert!(deliver(&notifier, receipt()).await);
        assert_eq!(notifier.attempts(), 3);
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drops_after_max_attempts() {
        let notifier = RecordingNotifier::failing_first(10);
        assert!(!deliver(&notifier, receipt()).await);
        assert_eq!(notifier.attempts(), MAX_ATTEMPTS);
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_returns_before_delivery_and_drain_waits() {
        let notifier = Arc::new(RecordingNotifier::failing_first(2));
        let dispatcher = Dispatcher::new(notifier.clone());

        let handle = dispatcher.dispatch(receipt());
        assert_eq!(notifier.count(), 0);
        assert_eq!(dispatcher.in_flight(), 1);

        dispatcher.drain().await;
        assert_eq!(notifier.count(), 1);
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(handle.await.unwrap());

        // The tracker accepts new work after a drain.
        dispatcher.dispatch(receipt());
        dispatcher.drain().await;
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn notifications_serialize_with_kind_tag() {
        let json = serde_json::to_value(receipt()).unwrap();
        assert_eq!(json["kind"], "payment_confirmed");
        assert_eq!(json["order_id"], "o1");
    }
}
