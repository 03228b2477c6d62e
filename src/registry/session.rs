//! Session registry
//!
//! Maps session ids to working directory, buffered history and liveness.
//! All mutation happens under one lock with no await inside, so no reader
//! ever observes a half-updated session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::buffer::SessionBuffer;
use crate::config::SessionConfig;
use crate::error::BridgeError;

/// Inactivity tier, advanced by `sweep_expiry`
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryTier {
    Fresh,
    Warned,
    WarnedLong,
    Expired,
}

impl ExpiryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryTier::Fresh => "fresh",
            ExpiryTier::Warned => "warned",
            ExpiryTier::WarnedLong => "warned_long",
            ExpiryTier::Expired => "expired",
        }
    }
}

/// A tier change observed during an expiry sweep, for upstream notifications
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryTransition {
    pub session_id: String,
    pub tier: ExpiryTier,
}

pub struct SessionEntry {
    pub id: String,
    pub working_directory: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub is_backgrounded: bool,
    /// The external tool's own session id, used for resume
    pub provider_session_id: Option<String>,
    pub expiry_tier: ExpiryTier,
    pub buffer: SessionBuffer,
}

/// Serializable point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub working_directory: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub is_backgrounded: bool,
    pub provider_session_id: Option<String>,
    pub expiry_tier: ExpiryTier,
    pub user_message_count: usize,
    pub assistant_message_count: usize,
    pub is_thinking: bool,
}

pub struct SessionRegistry {
    config: SessionConfig,
    inner: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent register/refresh. A different working directory for a
    /// known session is rejected; sessions are never migrated.
    pub fn track_session_for_routing(
        &self,
        session_id: &str,
        working_directory: &Path,
    ) -> Result<(), BridgeError> {
        if session_id.trim().is_empty() {
            return Err(BridgeError::Validation("empty session id".to_string()));
        }

        let mut sessions = self.lock();
        match sessions.get_mut(session_id) {
            Some(entry) => {
                if entry.working_directory != working_directory {
                    warn!(
                        session_id = %session_id,
                        existing = %entry.working_directory.display(),
                        requested = %working_directory.display(),
                        "Rejected working directory change"
                    );
                    return Err(BridgeError::Validation(format!(
                        "session {} is bound to {}, refusing to migrate to {}",
                        session_id,
                        entry.working_directory.display(),
                        working_directory.display()
                    )));
                }
                entry.last_activity = Utc::now();
                entry.expiry_tier = ExpiryTier::Fresh;
                if !entry.is_active {
                    info!(session_id = %session_id, "Reactivating dead session");
                    entry.is_active = true;
                }
                Ok(())
            }
            None => {
                let now = Utc::now();
                sessions.insert(
                    session_id.to_string(),
                    SessionEntry {
                        id: session_id.to_string(),
                        working_directory: working_directory.to_path_buf(),
                        created_at: now,
                        last_activity: now,
                        is_active: true,
                        is_backgrounded: false,
                        provider_session_id: None,
                        expiry_tier: ExpiryTier::Fresh,
                        buffer: SessionBuffer::new(Duration::from_secs(
                            self.config.message_ttl_secs,
                        )),
                    },
                );
                info!(
                    session_id = %session_id,
                    working_directory = %working_directory.display(),
                    "Tracking session"
                );
                Ok(())
            }
        }
    }

    /// Run a closure against a session's buffer. Returns None when the
    /// session is unknown; the buffer itself always exists once the session
    /// does.
    pub fn with_buffer<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionBuffer) -> R,
    ) -> Option<R> {
        let mut sessions = self.lock();
        sessions.get_mut(session_id).map(|entry| f(&mut entry.buffer))
    }

    /// Park content in the session's buffer under the supplied or a
    /// generated id
    pub fn store_message(
        &self,
        session_id: &str,
        message_id: Option<&str>,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<String, BridgeError> {
        self.with_buffer(session_id, |buffer| {
            buffer.store(message_id, content, metadata)
        })
        .ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))
    }

    /// Most-recently-active live session bound to this directory, for
    /// reconnection without a client-held id
    pub fn find_session_by_working_directory(&self, path: &Path) -> Option<String> {
        let sessions = self.lock();
        sessions
            .values()
            .filter(|entry| entry.is_active && entry.working_directory == path)
            .max_by_key(|entry| entry.last_activity)
            .map(|entry| entry.id.clone())
    }

    pub fn mark_session_foregrounded(&self, session_id: &str) -> Result<(), BridgeError> {
        self.update(session_id, |entry| {
            entry.is_backgrounded = false;
            entry.last_activity = Utc::now();
        })
    }

    pub fn mark_session_backgrounded(&self, session_id: &str) -> Result<(), BridgeError> {
        self.update(session_id, |entry| {
            entry.is_backgrounded = true;
        })
    }

    /// Liveness refresh: reset the inactivity clock and drop back to the
    /// fresh tier
    pub fn keep_session_alive(&self, session_id: &str) -> Result<(), BridgeError> {
        self.reset_session_timeout(session_id)
    }

    pub fn reset_session_timeout(&self, session_id: &str) -> Result<(), BridgeError> {
        self.update(session_id, |entry| {
            entry.last_activity = Utc::now();
            entry.expiry_tier = ExpiryTier::Fresh;
        })
    }

    /// Record the external tool's session id for later resume
    pub fn set_provider_session_id(
        &self,
        session_id: &str,
        provider_id: &str,
    ) -> Result<(), BridgeError> {
        self.update(session_id, |entry| {
            entry.provider_session_id = Some(provider_id.to_string());
        })
    }

    pub fn provider_session_id(&self, session_id: &str) -> Option<String> {
        let sessions = self.lock();
        sessions
            .get(session_id)
            .and_then(|entry| entry.provider_session_id.clone())
    }

    pub fn working_directory(&self, session_id: &str) -> Option<PathBuf> {
        let sessions = self.lock();
        sessions
            .get(session_id)
            .map(|entry| entry.working_directory.clone())
    }

    /// True once the session has been inactive past the expiry threshold
    pub fn is_expired(&self, session_id: &str) -> bool {
        let sessions = self.lock();
        match sessions.get(session_id) {
            Some(entry) => {
                !entry.is_active
                    || inactivity_secs(entry.last_activity) >= self.config.expire_secs
            }
            None => true,
        }
    }

    /// Advance expiry tiers across all sessions, returning the transitions
    /// so the caller can send warning/expiry notifications
    pub fn sweep_expiry(&self) -> Vec<ExpiryTransition> {
        let mut sessions = self.lock();
        let mut transitions = Vec::new();

        for entry in sessions.values_mut() {
            if !entry.is_active {
                continue;
            }
            let idle = inactivity_secs(entry.last_activity);
            let target = if idle >= self.config.expire_secs {
                ExpiryTier::Expired
            } else if idle >= self.config.warn_long_secs {
                ExpiryTier::WarnedLong
            } else if idle >= self.config.warn_secs {
                ExpiryTier::Warned
            } else {
                ExpiryTier::Fresh
            };

            if target != entry.expiry_tier {
                entry.expiry_tier = target;
                if target == ExpiryTier::Expired {
                    entry.is_active = false;
                    info!(session_id = %entry.id, "Session expired after inactivity");
                }
                transitions.push(ExpiryTransition {
                    session_id: entry.id.clone(),
                    tier: target,
                });
            }
        }
        transitions
    }

    /// Mark the session dead and drop its provider binding. Returns whether
    /// there was a session to clean; terminating the external process is the
    /// orchestrator's job.
    pub fn kill_session(&self, session_id: &str, reason: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(session_id) {
            Some(entry) => {
                entry.is_active = false;
                entry.provider_session_id = None;
                entry.buffer.clear_thinking();
                info!(session_id = %session_id, reason = %reason, "Session killed");
                true
            }
            None => {
                debug!(session_id = %session_id, "Kill requested for unknown session");
                false
            }
        }
    }

    pub fn snapshot(&self, session_id: &str) -> Option<SessionInfo> {
        let sessions = self.lock();
        sessions.get(session_id).map(SessionInfo::from_entry)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.lock();
        let mut infos: Vec<SessionInfo> =
            sessions.values().map(SessionInfo::from_entry).collect();
        infos.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        infos
    }

    fn update(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionEntry),
    ) -> Result<(), BridgeError> {
        let mut sessions = self.lock();
        match sessions.get_mut(session_id) {
            Some(entry) => {
                f(entry);
                Ok(())
            }
            None => Err(BridgeError::SessionNotFound(session_id.to_string())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.inner.lock().expect("session registry lock poisoned")
    }
}

impl SessionInfo {
    fn from_entry(entry: &SessionEntry) -> Self {
        Self {
            id: entry.id.clone(),
            working_directory: entry.working_directory.clone(),
            created_at: entry.created_at,
            last_activity: entry.last_activity,
            is_active: entry.is_active,
            is_backgrounded: entry.is_backgrounded,
            provider_session_id: entry.provider_session_id.clone(),
            expiry_tier: entry.expiry_tier,
            user_message_count: entry.buffer.user_messages.len(),
            assistant_message_count: entry.buffer.assistant_messages.len(),
            is_thinking: entry.buffer.thinking.is_thinking,
        }
    }
}

fn inactivity_secs(last_activity: DateTime<Utc>) -> u64 {
    (Utc::now() - last_activity).num_seconds().max(0) as u64
}
