//! Prompt handler
//!
//! The queue-side of the pipeline: drives the orchestrator for one dequeued
//! message, forwards progress to the delivery sink, updates the session
//! buffer, and delivers the outcome. Failure is reported through the
//! returned `Result` so the queue can retry or dead-letter.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::delivery::{
    DeliverySink, DeviceRecord, ErrorDelivery, ProgressDelivery, ResultDelivery,
};
use crate::orchestrator::{ClaudeClient, ProgressEvent, ProgressKind, PromptRequest};
use crate::queue::{MessageHandler, MessageMetadata, QueuedMessage};
use crate::registry::SessionRegistry;

pub struct PromptHandler {
    session_id: String,
    registry: Arc<SessionRegistry>,
    orchestrator: Arc<ClaudeClient>,
    sink: Arc<dyn DeliverySink>,
    max_attempts: u32,
}

impl PromptHandler {
    pub fn new(
        session_id: impl Into<String>,
        registry: Arc<SessionRegistry>,
        orchestrator: Arc<ClaudeClient>,
        sink: Arc<dyn DeliverySink>,
        max_attempts: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            registry,
            orchestrator,
            sink,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[async_trait]
impl MessageHandler for PromptHandler {
    async fn handle(&self, message: &QueuedMessage) -> Result<()> {
        let working_directory = self
            .registry
            .working_directory(&self.session_id)
            .ok_or_else(|| anyhow!("session {} is not tracked", self.session_id))?;
        let project_name = working_directory
            .file_name()
            .map(|name| name.to_string_lossy().to_string());

        let device = device_from(&message.metadata);
        let request_id = message.request_id().to_string();

        self.registry.with_buffer(&self.session_id, |buffer| {
            buffer.push_user(&message.payload.text);
            buffer.set_thinking("starting");
        });
        let _ = self.registry.reset_session_timeout(&self.session_id);

        // Progress channel scoped to this one prompt; the sender dies with
        // the orchestrator call, which ends the forwarder.
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let forwarder = {
            let sink = self.sink.clone();
            let registry = self.registry.clone();
            let session_id = self.session_id.clone();
            let request_id = request_id.clone();
            let device = device.clone();
            tokio::spawn(async move {
                while let Some(event) = progress_rx.recv().await {
                    let activity = match &event.kind {
                        ProgressKind::Starting => "starting".to_string(),
                        ProgressKind::TextChunk { preview } => format!("writing: {}", preview),
                        ProgressKind::ToolUse { name } => format!("using tool {}", name),
                    };
                    registry.with_buffer(&session_id, |buffer| {
                        buffer.set_thinking(&activity);
                        buffer.update_thinking_tokens(event.chars);
                    });
                    let delivery = ProgressDelivery {
                        activity,
                        duration_ms: event.elapsed_ms,
                        token_count: event.chars,
                        request_id: request_id.clone(),
                    };
                    if let Err(e) = sink.deliver_progress(&device, &delivery).await {
                        debug!(error = %e, "Progress delivery failed");
                    }
                }
            })
        };

        let outcome = self
            .orchestrator
            .send_prompt(PromptRequest {
                text: message.payload.text.clone(),
                session_id: self.session_id.clone(),
                request_id: request_id.clone(),
                working_directory,
                attachments: message.payload.attachments.clone(),
                streaming: true,
                progress: Some(progress_tx),
            })
            .await;

        let _ = forwarder.await;
        self.registry
            .with_buffer(&self.session_id, |buffer| buffer.clear_thinking());

        match outcome {
            Ok(result) => {
                let _ = self
                    .registry
                    .set_provider_session_id(&self.session_id, &result.session_id);
                self.registry.with_buffer(&self.session_id, |buffer| {
                    buffer.push_assistant(&result.result);
                });
                let _ = self.registry.reset_session_timeout(&self.session_id);

                let delivery = ResultDelivery {
                    message: result.result,
                    session_id: self.session_id.clone(),
                    project_name,
                    request_id,
                    is_final: true,
                    attachment_info: None,
                };
                // Delivery failure never rolls back a completed message
                if let Err(e) = self.sink.deliver_result(&device, &delivery).await {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        "Result delivery failed"
                    );
                }
                Ok(())
            }
            Err(process_error) => {
                // Only the final attempt surfaces the error to the client;
                // earlier failures are silently retried by the queue.
                if message.attempts + 1 >= self.max_attempts {
                    let delivery = ErrorDelivery {
                        session_id: self.session_id.clone(),
                        error: process_error.kind.user_message().to_string(),
                        error_type: process_error.kind.as_str().to_string(),
                        request_id,
                    };
                    if let Err(e) = self.sink.deliver_error(&device, &delivery).await {
                        warn!(
                            session_id = %self.session_id,
                            error = %e,
                            "Error delivery failed"
                        );
                    }
                }
                Err(process_error.into())
            }
        }
    }
}

fn device_from(metadata: &MessageMetadata) -> DeviceRecord {
    DeviceRecord {
        device_id: metadata
            .device_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        user_id: metadata.user_id.clone(),
        platform: None,
        last_seen: metadata.enqueued_at,
        is_primary: false,
    }
}
