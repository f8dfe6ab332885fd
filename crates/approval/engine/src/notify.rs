//! Best-effort notification of todo changes
//!
//! The engine only ever enqueues snapshots after a transition has
//! committed. Delivery happens later through [`NotificationOutbox::flush`],
//! usually driven by the worker from [`NotificationOutbox::spawn_worker`].
//! Nothing in here can fail or block a transition.

use crate::config::NotificationConfig;
use approval_types::TodoSnapshot;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Failures reported by a notification channel
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("push timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel rejected the snapshot: {0}")]
    Rejected(String),

    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Outbound channel mirroring todos into a third-party surface
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn push(&self, snapshot: &TodoSnapshot) -> Result<(), DispatchError>;
}

/// Dispatcher that only emits a tracing event per snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn push(&self, snapshot: &TodoSnapshot) -> Result<(), DispatchError> {
        tracing::info!(
            todo_id = %snapshot.todo_id,
            owner = %snapshot.owner_id,
            status = %snapshot.status,
            title = %snapshot.title,
            "Todo notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Queued {
    snapshot: TodoSnapshot,
    attempts: u32,
}

/// What one flush did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

struct OutboxInner {
    dispatcher: Arc<dyn NotificationDispatcher>,
    config: NotificationConfig,
    queue: Mutex<VecDeque<Queued>>,
}

/// Bounded queue of snapshots awaiting delivery
#[derive(Clone)]
pub struct NotificationOutbox {
    inner: Arc<OutboxInner>,
}

impl NotificationOutbox {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, config: NotificationConfig) -> Self {
        Self {
            inner: Arc::new(OutboxInner {
                dispatcher,
                config,
                queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    // Poisoning is ignored; the queue only holds plain data.
    fn queue(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a snapshot; drops the oldest entry when full
    pub fn enqueue(&self, snapshot: TodoSnapshot) {
        let capacity = self.inner.config.queue_capacity.max(1);
        let mut queue = self.queue();
        while queue.len() >= capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::warn!(
                    todo_id = %dropped.snapshot.todo_id,
                    capacity,
                    "Notification queue full, dropping oldest snapshot"
                );
            }
        }
        queue.push_back(Queued {
            snapshot,
            attempts: 0,
        });
    }

    pub fn enqueue_all(&self, snapshots: impl IntoIterator<Item = TodoSnapshot>) {
        for snapshot in snapshots {
            self.enqueue(snapshot);
        }
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Push everything currently queued once
    pub async fn flush(&self) -> FlushReport {
        let batch: Vec<Queued> = self.queue().drain(..).collect();
        let mut report = FlushReport::default();
        let timeout = self.inner.config.push_timeout();
        let mut retry = Vec::new();

        for mut item in batch {
            let result =
                match tokio::time::timeout(timeout, self.inner.dispatcher.push(&item.snapshot))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout(timeout)),
                };

            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    item.attempts += 1;
                    if item.attempts >= self.inner.config.max_attempts {
                        tracing::warn!(
                            todo_id = %item.snapshot.todo_id,
                            attempts = item.attempts,
                            error = %err,
                            "Dropping todo notification after repeated failures"
                        );
                        report.dropped += 1;
                    } else {
                        tracing::warn!(
                            todo_id = %item.snapshot.todo_id,
                            attempts = item.attempts,
                            error = %err,
                            "Todo notification failed, queued for retry"
                        );
                        retry.push(item);
                    }
                }
            }
        }

        if !retry.is_empty() {
            let capacity = self.inner.config.queue_capacity.max(1);
            report.requeued = retry.len();
            let mut queue = self.queue();
            // Failed items go ahead of anything enqueued during the flush.
            for item in retry.into_iter().rev() {
                queue.push_front(item);
            }
            while queue.len() > capacity {
                if let Some(dropped) = queue.pop_front() {
                    tracing::warn!(
                        todo_id = %dropped.snapshot.todo_id,
                        capacity,
                        "Notification queue full after retry, dropping oldest snapshot"
                    );
                    report.requeued = report.requeued.saturating_sub(1);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    /// Flush on an interval until `shutdown` flips to `true`, then flush once more
    pub fn spawn_worker(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let outbox = self.clone();
        let period = self.inner.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !outbox.is_empty() {
                            outbox.flush().await;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            let report = outbox.flush().await;
            tracing::info!(
                delivered = report.delivered,
                pending = outbox.len(),
                "Notification worker stopped"
            );
        })
    }
}
