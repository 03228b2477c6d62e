//! Bridge service
//!
//! Explicitly constructed composition of the registry, orchestrator, queue
//! manager and delivery sink. Inbound messages are acknowledged as data the
//! moment they are accepted; every outcome reaches the client later through
//! the sink.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::handler::PromptHandler;
use crate::config::Config;
use crate::delivery::DeliverySink;
use crate::error::BridgeError;
use crate::orchestrator::ClaudeClient;
use crate::queue::{
    EnqueueOutcome, ManagerStatus, MessageMetadata, MessagePayload, Priority, QueueManager,
};
use crate::registry::{ExpiryTransition, SessionInfo, SessionRegistry};

/// Composed outcome of tearing a session down
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KillReport {
    pub success: bool,
    pub process_killed: bool,
    pub session_cleaned: bool,
    pub pending_cleared: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub queues: ManagerStatus,
    pub sessions: Vec<SessionInfo>,
}

pub struct Bridge {
    config: Config,
    registry: Arc<SessionRegistry>,
    orchestrator: Arc<ClaudeClient>,
    queues: Arc<QueueManager>,
    sink: Arc<dyn DeliverySink>,
}

impl Bridge {
    pub fn new(config: Config, sink: Arc<dyn DeliverySink>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session.clone()));
        let orchestrator = Arc::new(ClaudeClient::new(config.resolve_claude_path()));
        let queues = Arc::new(QueueManager::new(config.queue.clone()));
        Self {
            config,
            registry,
            orchestrator,
            queues,
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<ClaudeClient> {
        &self.orchestrator
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Accept an inbound message for a session: validate routing, make sure
    /// the session's queue and handler exist, and enqueue. The structured
    /// outcome is the immediate acknowledgement; results arrive through the
    /// sink.
    pub async fn submit(
        &self,
        session_id: &str,
        working_directory: &Path,
        payload: MessagePayload,
        priority: Priority,
        metadata: MessageMetadata,
    ) -> Result<EnqueueOutcome, BridgeError> {
        self.registry
            .track_session_for_routing(session_id, working_directory)?;

        let queue = self.queues.get_queue(session_id).await;
        if !queue.has_handler() {
            let handler = Arc::new(PromptHandler::new(
                session_id,
                self.registry.clone(),
                self.orchestrator.clone(),
                self.sink.clone(),
                self.config.queue.max_attempts,
            ));
            queue.set_handler(handler);
        }

        Ok(queue.enqueue(payload, priority, metadata).await)
    }

    /// User-triggered stop: pause the queue, drop pending work and terminate
    /// the running process. The killed prompt is discarded, never retried;
    /// the session itself stays alive and resumable.
    pub async fn interrupt(&self, session_id: &str) -> KillReport {
        let pending_cleared = match self.queues.find_queue(session_id).await {
            Some(queue) => {
                queue.pause().await;
                queue.cancel_inflight().await;
                queue.clear().await
            }
            None => 0,
        };

        let kill = self
            .orchestrator
            .kill_session(session_id, "interrupted by user")
            .await;

        info!(
            session_id = %session_id,
            process_killed = kill.process_killed,
            pending_cleared,
            "Session interrupted"
        );

        KillReport {
            success: kill.success,
            process_killed: kill.process_killed,
            session_cleaned: false,
            pending_cleared,
        }
    }

    /// Full teardown: interrupt, remove the queue and mark the session dead
    /// in the registry.
    pub async fn kill_session(&self, session_id: &str, reason: &str) -> KillReport {
        let pending_cleared = match self.queues.find_queue(session_id).await {
            Some(queue) => {
                queue.pause().await;
                queue.cancel_inflight().await;
                queue.clear().await
            }
            None => 0,
        };

        let kill = self.orchestrator.kill_session(session_id, reason).await;
        self.queues.remove_queue(session_id).await;
        let session_cleaned = self.registry.kill_session(session_id, reason);

        KillReport {
            success: kill.success,
            process_killed: kill.process_killed,
            session_cleaned,
            pending_cleared,
        }
    }

    /// Advance session expiry tiers; the caller decides how to notify on
    /// each transition.
    pub fn sweep_expiry(&self) -> Vec<ExpiryTransition> {
        self.registry.sweep_expiry()
    }

    pub async fn status(&self) -> BridgeStatus {
        BridgeStatus {
            queues: self.queues.status().await,
            sessions: self.registry.list(),
        }
    }
}
