use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::ObserverError;
use super::traits::{Notification, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    Closed,
}

/// Result of handing a notification to the queue. Enqueued notifications
/// are delivered at most once; dropped ones are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued,
    Dropped(DropReason),
}

/// Bounded notification queue drained by a detached worker task
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    sender: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Start the worker on the current runtime
    pub fn spawn(notifiers: Vec<Arc<dyn Notifier>>, capacity: usize, notify_timeout: Duration) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(receiver, notifiers, notify_timeout));
        (Self { sender }, worker)
    }

    /// Queue size and delivery timeout from `CONFIG.notify`
    pub fn from_config(notifiers: Vec<Arc<dyn Notifier>>) -> (Self, JoinHandle<()>) {
        let settings = &crate::config::CONFIG.notify;
        Self::spawn(notifiers, settings.queue_capacity, settings.timeout())
    }

    /// Never blocks the caller
    pub fn dispatch(&self, notification: Notification) -> DispatchOutcome {
        let event = notification.event;
        let record_id = notification.record_id;
        match self.sender.try_send(notification) {
            Ok(()) => {
                debug!(%event, %record_id, "Notification enqueued");
                DispatchOutcome::Enqueued
            }
            Err(TrySendError::Full(_)) => {
                warn!(%event, %record_id, "Notification queue full; dropping notification");
                DispatchOutcome::Dropped(DropReason::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%event, %record_id, "Notification worker stopped; dropping notification");
                DispatchOutcome::Dropped(DropReason::Closed)
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Notification>,
    notifiers: Vec<Arc<dyn Notifier>>,
    notify_timeout: Duration,
) {
    while let Some(notification) = receiver.recv().await {
        for notifier in &notifiers {
            match deliver(notifier.as_ref(), &notification, notify_timeout).await {
                Ok(()) => debug!(
                    notifier = notifier.name(),
                    event = %notification.event,
                    record_id = %notification.record_id,
                    "Notification delivered"
                ),
                Err(e) => warn!(
                    event = %notification.event,
                    record_id = %notification.record_id,
                    "Notification failed: {}",
                    e
                ),
            }
        }
    }
    debug!("Notification worker exiting");
}

async fn deliver(
    notifier: &dyn Notifier,
    notification: &Notification,
    notify_timeout: Duration,
) -> Result<(), ObserverError> {
    match timeout(notify_timeout, notifier.notify(notification)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(ObserverError::NotifierError { message, .. })) => Err(ObserverError::notifier(notifier.name(), message)),
        Ok(Err(other)) => Err(ObserverError::notifier(notifier.name(), other.to_string())),
        Err(_) => Err(ObserverError::notifier(
            notifier.name(),
            format!("timed out after {:?}", notify_timeout),
        )),
    }
}
