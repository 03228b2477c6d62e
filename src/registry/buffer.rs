//! Buffered conversation history for one session

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One message kept in a session buffer
#[derive(Debug, Clone, Serialize)]
pub struct BufferedMessage {
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl BufferedMessage {
    fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// What the assistant is doing right now, surfaced in progress notifications
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThinkingState {
    pub is_thinking: bool,
    pub activity: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub token_count: u64,
}

impl ThinkingState {
    /// Milliseconds spent thinking so far
    pub fn duration_ms(&self) -> u64 {
        match self.started_at {
            Some(started) => (Utc::now() - started).num_milliseconds().max(0) as u64,
            None => 0,
        }
    }
}

/// Large content parked under a generated id, evicted after a TTL
#[derive(Debug, Clone)]
struct StoredContent {
    content: String,
    metadata: serde_json::Value,
    stored_at: DateTime<Utc>,
}

/// Ordered message history plus TTL-bounded content storage
pub struct SessionBuffer {
    ttl: Duration,
    pub user_messages: Vec<BufferedMessage>,
    pub assistant_messages: Vec<BufferedMessage>,
    stored: HashMap<String, StoredContent>,
    pub thinking: ThinkingState,
}

impl SessionBuffer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            user_messages: Vec::new(),
            assistant_messages: Vec::new(),
            stored: HashMap::new(),
            thinking: ThinkingState::default(),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> String {
        let msg = BufferedMessage::new(content);
        let id = msg.id.clone();
        self.user_messages.push(msg);
        id
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> String {
        let msg = BufferedMessage::new(content);
        let id = msg.id.clone();
        self.assistant_messages.push(msg);
        id
    }

    /// Park content under the supplied id, or a generated one. Expired
    /// entries are evicted on every store to bound memory.
    pub fn store(
        &mut self,
        message_id: Option<&str>,
        content: impl Into<String>,
        metadata: serde_json::Value,
    ) -> String {
        self.evict_expired();

        let id = message_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.stored.insert(
            id.clone(),
            StoredContent {
                content: content.into(),
                metadata,
                stored_at: Utc::now(),
            },
        );
        id
    }

    /// Fetch stored content if it has not expired
    pub fn retrieve(&mut self, message_id: &str) -> Option<(String, serde_json::Value)> {
        self.evict_expired();
        self.stored
            .get(message_id)
            .map(|entry| (entry.content.clone(), entry.metadata.clone()))
    }

    pub fn stored_count(&self) -> usize {
        self.stored.len()
    }

    fn evict_expired(&mut self) {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1));
        let cutoff = Utc::now() - ttl;
        self.stored.retain(|_, entry| entry.stored_at > cutoff);
    }

    pub fn set_thinking(&mut self, activity: impl Into<String>) {
        if !self.thinking.is_thinking {
            self.thinking.started_at = Some(Utc::now());
        }
        self.thinking.is_thinking = true;
        self.thinking.activity = Some(activity.into());
    }

    pub fn update_thinking_tokens(&mut self, token_count: u64) {
        self.thinking.token_count = token_count;
    }

    pub fn clear_thinking(&mut self) {
        self.thinking = ThinkingState::default();
    }
}
