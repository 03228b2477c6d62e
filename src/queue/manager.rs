//! Queue manager
//!
//! Owns the session-id to queue map. Queues are created lazily and are
//! independent lanes; no ordering exists across sessions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::session_queue::{MessageHandler, QueueStatus, SessionQueue};
use crate::config::QueueConfig;

/// Aggregate view over every live queue
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub queue_count: usize,
    pub total_pending: usize,
    pub total_dead_lettered: usize,
    pub queues: Vec<QueueStatus>,
}

pub struct QueueManager {
    config: QueueConfig,
    queues: Mutex<HashMap<String, Arc<SessionQueue>>>,
}

impl QueueManager {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Get the queue for a session, creating it lazily
    pub async fn get_queue(&self, session_id: &str) -> Arc<SessionQueue> {
        let mut queues = self.queues.lock().await;
        if let Some(queue) = queues.get(session_id) {
            return queue.clone();
        }

        debug!(session_id = %session_id, "Creating session queue");
        let queue = Arc::new(SessionQueue::new(session_id, &self.config));
        queues.insert(session_id.to_string(), queue.clone());
        queue
    }

    /// Look up a queue without creating one
    pub async fn find_queue(&self, session_id: &str) -> Option<Arc<SessionQueue>> {
        self.queues.lock().await.get(session_id).cloned()
    }

    /// Install the handler for a session's queue, creating the queue if
    /// needed. The worker only starts once a handler exists, so messages
    /// enqueued earlier wait rather than racing ahead.
    pub async fn set_handler(&self, session_id: &str, handler: Arc<dyn MessageHandler>) {
        let queue = self.get_queue(session_id).await;
        queue.set_handler(handler);
    }

    /// Close and drop a session's queue. Returns whether one existed.
    pub async fn remove_queue(&self, session_id: &str) -> bool {
        let queue = self.queues.lock().await.remove(session_id);
        match queue {
            Some(queue) => {
                queue.close().await;
                info!(session_id = %session_id, "Removed session queue");
                true
            }
            None => false,
        }
    }

    pub async fn queue_count(&self) -> usize {
        self.queues.lock().await.len()
    }

    /// Aggregate status across all queues
    pub async fn status(&self) -> ManagerStatus {
        let queues: Vec<Arc<SessionQueue>> = self.queues.lock().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(queues.len());
        for queue in queues {
            statuses.push(queue.status().await);
        }

        ManagerStatus {
            queue_count: statuses.len(),
            total_pending: statuses.iter().map(|s| s.length).sum(),
            total_dead_lettered: statuses.iter().map(|s| s.dead_letter_size).sum(),
            queues: statuses,
        }
    }
}
