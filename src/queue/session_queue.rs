//! Per-session message queue
//!
//! Guarantees at most one message per session is being acted on at any time.
//! A dedicated worker task consumes the queue sequentially; enqueue is safe
//! from any task. Pending messages are indexed by (priority rank, sequence),
//! so strict priority with FIFO inside each tier falls out of map order.
//! Retries reinsert with a decreasing sequence, placing them at the front of
//! their tier.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dedup::DedupWindow;
use super::message::{
    EnqueueOutcome, MessageMetadata, MessagePayload, MessageStatus, Priority, QueuedMessage,
};
use crate::config::QueueConfig;

/// Handles one dequeued message. The returned `Result` is the single
/// completion signal: `Ok` completes the message, `Err` retries it until the
/// attempt budget is spent, then dead-letters it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueuedMessage) -> Result<()>;
}

/// Per-queue counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub processed: u64,
    pub failed: u64,
    pub deduplicated: u64,
}

/// Point-in-time queue introspection
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub session_id: String,
    pub length: usize,
    pub paused: bool,
    pub current_message: Option<QueuedMessage>,
    pub dead_letter_size: usize,
    pub stats: QueueStats,
}

struct QueueState {
    /// Keyed by (priority rank, sequence); map order is dequeue order
    pending: BTreeMap<(u8, i64), QueuedMessage>,
    /// Grows forward for new messages
    next_seq: i64,
    /// Shrinks backward for retries, which re-enter at the front of their tier
    front_seq: i64,
    current: Option<QueuedMessage>,
    /// Set while cancelling the in-flight message; its failure is discarded
    /// instead of retried
    cancel_current: bool,
    paused: bool,
    closed: bool,
    dead_letter: Vec<QueuedMessage>,
    dedup: DedupWindow,
    stats: QueueStats,
}

pub struct SessionQueue {
    session_id: String,
    max_attempts: u32,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionQueue {
    pub fn new(session_id: impl Into<String>, config: &QueueConfig) -> Self {
        Self {
            session_id: session_id.into(),
            max_attempts: config.max_attempts.max(1),
            state: Arc::new(Mutex::new(QueueState {
                pending: BTreeMap::new(),
                next_seq: 1,
                front_seq: 0,
                current: None,
                cancel_current: false,
                paused: false,
                closed: false,
                dead_letter: Vec::new(),
                dedup: DedupWindow::new(Duration::from_secs(config.dedup_window_secs)),
                stats: QueueStats::default(),
            })),
            notify: Arc::new(Notify::new()),
            worker: std::sync::Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn has_handler(&self) -> bool {
        self.worker.lock().expect("worker lock poisoned").is_some()
    }

    /// Install the handler and start the worker task. Messages enqueued
    /// before this simply wait; nothing can be dequeued without a handler.
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        let mut worker = self.worker.lock().expect("worker lock poisoned");
        if worker.is_some() {
            warn!(session_id = %self.session_id, "Handler already installed, ignoring");
            return;
        }

        let session_id = self.session_id.clone();
        let state = self.state.clone();
        let notify = self.notify.clone();
        let max_attempts = self.max_attempts;

        *worker = Some(tokio::spawn(async move {
            Self::run_worker(session_id, state, notify, handler, max_attempts).await;
        }));
    }

    async fn run_worker(
        session_id: String,
        state: Arc<Mutex<QueueState>>,
        notify: Arc<Notify>,
        handler: Arc<dyn MessageHandler>,
        max_attempts: u32,
    ) {
        debug!(session_id = %session_id, "Queue worker started");
        loop {
            let next = {
                let mut guard = state.lock().await;
                if guard.closed {
                    break;
                }
                if !guard.paused && guard.current.is_none() {
                    match guard.pending.keys().next().copied() {
                        Some(key) => {
                            let mut msg = guard
                                .pending
                                .remove(&key)
                                .expect("key just observed in pending");
                            msg.status = MessageStatus::Processing;
                            guard.current = Some(msg.clone());
                            Some(msg)
                        }
                        None => None,
                    }
                } else {
                    None
                }
            };

            match next {
                Some(msg) => {
                    debug!(
                        session_id = %session_id,
                        message_id = %msg.id,
                        priority = msg.priority.as_str(),
                        attempt = msg.attempts + 1,
                        "Processing message"
                    );
                    // The lock is not held while the handler runs; enqueue,
                    // pause and status stay responsive during processing.
                    let outcome = handler.handle(&msg).await;

                    let mut guard = state.lock().await;
                    let mut finished = guard.current.take().unwrap_or(msg);
                    let cancelled = guard.cancel_current;
                    guard.cancel_current = false;
                    match outcome {
                        Ok(()) => {
                            finished.status = MessageStatus::Completed;
                            guard.stats.processed += 1;
                            debug!(
                                session_id = %session_id,
                                message_id = %finished.id,
                                "Message completed"
                            );
                        }
                        Err(err) => {
                            finished.attempts += 1;
                            finished.last_error = Some(err.to_string());
                            if cancelled || guard.closed {
                                info!(
                                    session_id = %session_id,
                                    message_id = %finished.id,
                                    "Dropping cancelled in-flight message"
                                );
                            } else if finished.attempts < max_attempts {
                                info!(
                                    session_id = %session_id,
                                    message_id = %finished.id,
                                    attempts = finished.attempts,
                                    error = %err,
                                    "Message failed, requeuing at front of tier"
                                );
                                finished.status = MessageStatus::Pending;
                                let key = (finished.priority.rank(), guard.front_seq);
                                guard.front_seq -= 1;
                                guard.pending.insert(key, finished);
                            } else {
                                warn!(
                                    session_id = %session_id,
                                    message_id = %finished.id,
                                    attempts = finished.attempts,
                                    error = %err,
                                    "Message exhausted retries, moving to dead letter"
                                );
                                finished.status = MessageStatus::Failed;
                                guard.stats.failed += 1;
                                guard.dead_letter.push(finished);
                            }
                        }
                    }
                }
                None => notify.notified().await,
            }
        }
        debug!(session_id = %session_id, "Queue worker stopped");
    }

    /// Enqueue a message. Duplicates inside the dedup window and invalid
    /// payloads come back as structured outcomes, never as errors.
    pub async fn enqueue(
        &self,
        payload: MessagePayload,
        priority: Priority,
        metadata: MessageMetadata,
    ) -> EnqueueOutcome {
        if payload.text.trim().is_empty() {
            return EnqueueOutcome::Rejected {
                reason: "empty message".to_string(),
            };
        }

        let mut guard = self.state.lock().await;
        if guard.closed {
            return EnqueueOutcome::Rejected {
                reason: "queue removed".to_string(),
            };
        }

        let fingerprint = DedupWindow::fingerprint(&self.session_id, &payload.text);
        if let Some(info) = guard
            .dedup
            .check_and_record(fingerprint, metadata.device_id.clone())
        {
            guard.stats.deduplicated += 1;
            debug!(
                session_id = %self.session_id,
                original_device = ?info.device_id,
                "Rejected duplicate message"
            );
            return EnqueueOutcome::Duplicate { info };
        }

        let message = QueuedMessage::new(payload, priority, metadata);
        let message_id = message.id.clone();
        let key = (priority.rank(), guard.next_seq);
        guard.next_seq += 1;
        guard.pending.insert(key, message);
        guard.stats.queued += 1;
        drop(guard);

        self.notify.notify_one();
        EnqueueOutcome::Queued { message_id }
    }

    /// Change a pending message's priority in place. Returns false when the
    /// message is not pending (unknown, in flight, or already finished).
    pub async fn reprioritize(&self, message_id: &str, priority: Priority) -> bool {
        let mut guard = self.state.lock().await;
        let key = guard
            .pending
            .iter()
            .find(|(_, msg)| msg.id == message_id)
            .map(|(key, _)| *key);

        match key {
            Some(key) => {
                let mut msg = guard.pending.remove(&key).expect("key just observed");
                msg.priority = priority;
                let new_key = (priority.rank(), guard.next_seq);
                guard.next_seq += 1;
                guard.pending.insert(new_key, msg);
                drop(guard);
                self.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Discard the in-flight message when it resolves with an error, instead
    /// of retrying it. Returns false when nothing is in flight.
    pub async fn cancel_inflight(&self) -> bool {
        let mut guard = self.state.lock().await;
        if guard.current.is_none() {
            return false;
        }
        guard.cancel_current = true;
        info!(session_id = %self.session_id, "Cancelling in-flight message");
        true
    }

    /// Halt future dequeues. Does not interrupt in-flight work.
    pub async fn pause(&self) {
        let mut guard = self.state.lock().await;
        guard.paused = true;
        info!(session_id = %self.session_id, "Queue paused");
    }

    pub async fn resume(&self) {
        {
            let mut guard = self.state.lock().await;
            guard.paused = false;
        }
        info!(session_id = %self.session_id, "Queue resumed");
        self.notify.notify_one();
    }

    /// Discard pending messages, sparing the one being processed.
    /// Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut guard = self.state.lock().await;
        let removed = guard.pending.len();
        guard.pending.clear();
        info!(session_id = %self.session_id, removed, "Cleared pending messages");
        removed
    }

    /// Tear the queue down: discard pending work and stop the worker once
    /// any in-flight message resolves.
    pub async fn close(&self) {
        {
            let mut guard = self.state.lock().await;
            guard.closed = true;
            guard.pending.clear();
        }
        self.notify.notify_one();
        info!(session_id = %self.session_id, "Queue closed");
    }

    pub async fn status(&self) -> QueueStatus {
        let guard = self.state.lock().await;
        QueueStatus {
            session_id: self.session_id.clone(),
            length: guard.pending.len(),
            paused: guard.paused,
            current_message: guard.current.clone(),
            dead_letter_size: guard.dead_letter.len(),
            stats: guard.stats,
        }
    }

    /// Snapshot of dead-lettered messages
    pub async fn dead_letter(&self) -> Vec<QueuedMessage> {
        self.state.lock().await.dead_letter.clone()
    }

    /// Wait until the queue is idle: nothing pending and nothing in flight.
    /// Intended for tests and one-shot CLI use.
    pub async fn drain(&self) {
        loop {
            {
                let guard = self.state.lock().await;
                if guard.pending.is_empty() && guard.current.is_none() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for SessionQueue {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                handle.abort();
            }
        }
    }
}
