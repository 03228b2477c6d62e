//! Delivery sink trait and wire types
//!
//! The sink is the push-notification boundary. Results, errors and progress
//! updates all leave through here asynchronously; nothing is ever answered
//! on the original request. Delivery failures are logged and swallowed,
//! never rolled back into queue state.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A device registered for delivery, consumed from the device-coordination
/// layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub user_id: Option<String>,
    pub platform: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Elected primary for the session, used for tie-breaks
    #[serde(default)]
    pub is_primary: bool,
}

impl DeviceRecord {
    pub fn unknown() -> Self {
        Self {
            device_id: "unknown".to_string(),
            user_id: None,
            platform: None,
            last_seen: None,
            is_primary: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultDelivery {
    pub message: String,
    pub session_id: String,
    pub project_name: Option<String>,
    pub request_id: String,
    pub is_final: bool,
    pub attachment_info: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDelivery {
    pub session_id: String,
    pub error: String,
    pub error_type: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressDelivery {
    pub activity: String,
    pub duration_ms: u64,
    pub token_count: u64,
    pub request_id: String,
}

/// Asynchronous delivery channel back to the client
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver_result(&self, device: &DeviceRecord, delivery: &ResultDelivery) -> Result<()>;

    async fn deliver_error(&self, device: &DeviceRecord, delivery: &ErrorDelivery) -> Result<()>;

    async fn deliver_progress(
        &self,
        device: &DeviceRecord,
        delivery: &ProgressDelivery,
    ) -> Result<()>;
}

/// Default sink that writes deliveries to the log, for local runs and the
/// CLI
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver_result(&self, device: &DeviceRecord, delivery: &ResultDelivery) -> Result<()> {
        info!(
            device_id = %device.device_id,
            session_id = %delivery.session_id,
            request_id = %delivery.request_id,
            is_final = delivery.is_final,
            "Result: {}",
            delivery.message
        );
        Ok(())
    }

    async fn deliver_error(&self, device: &DeviceRecord, delivery: &ErrorDelivery) -> Result<()> {
        info!(
            device_id = %device.device_id,
            session_id = %delivery.session_id,
            request_id = %delivery.request_id,
            error_type = %delivery.error_type,
            "Error: {}",
            delivery.error
        );
        Ok(())
    }

    async fn deliver_progress(
        &self,
        device: &DeviceRecord,
        delivery: &ProgressDelivery,
    ) -> Result<()> {
        info!(
            device_id = %device.device_id,
            request_id = %delivery.request_id,
            duration_ms = delivery.duration_ms,
            token_count = delivery.token_count,
            "Progress: {}",
            delivery.activity
        );
        Ok(())
    }
}
