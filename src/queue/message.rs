//! Queued message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority tiers, highest first
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Rank used for ordering: lower sorts first
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => anyhow::bail!("Unknown priority: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// The opaque work carried by a queued message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// Routing hints carried alongside the payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub request_id: Option<String>,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    pub enqueued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub payload: MessagePayload,
    pub priority: Priority,
    pub metadata: MessageMetadata,
    pub status: MessageStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueuedMessage {
    pub fn new(payload: MessagePayload, priority: Priority, mut metadata: MessageMetadata) -> Self {
        metadata.enqueued_at.get_or_insert_with(Utc::now);
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            priority,
            metadata,
            status: MessageStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// The request id used to correlate progress and delivery, falling back
    /// to the message id when the device did not supply one
    pub fn request_id(&self) -> &str {
        self.metadata.request_id.as_deref().unwrap_or(&self.id)
    }
}

/// Who enqueued the message we collided with, and when
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateInfo {
    pub device_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

/// Structured enqueue outcome; rejections are data, not errors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum EnqueueOutcome {
    Queued { message_id: String },
    Duplicate { info: DuplicateInfo },
    Rejected { reason: String },
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued { .. })
    }
}
