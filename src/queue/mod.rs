//! Per-session message queuing

pub mod dedup;
pub mod manager;
pub mod message;
pub mod session_queue;

pub use manager::{ManagerStatus, QueueManager};
pub use message::{
    DuplicateInfo, EnqueueOutcome, MessageMetadata, MessagePayload, MessageStatus, Priority,
    QueuedMessage,
};
pub use session_queue::{MessageHandler, QueueStats, QueueStatus, SessionQueue};
