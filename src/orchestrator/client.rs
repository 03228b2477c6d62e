//! Assistant CLI client
//!
//! Drives one external assistant process per prompt, bound to the session's
//! working directory. Output is consumed as a stream of line-delimited JSON
//! records; progress goes out over a per-call channel. There is no internal
//! timeout: prompts may run arbitrarily long, and cancellation is an
//! explicit kill from outside.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::stream::{
    extract_final_text, preview, ContentBlock, ProgressEvent, ProgressKind, ResultSource,
    StreamRecord,
};
use crate::error::{ProcessError, ProcessErrorKind};

const PREVIEW_CHARS: usize = 80;

/// A prompt bound for one session's external process
pub struct PromptRequest {
    pub text: String,
    pub session_id: String,
    pub request_id: String,
    pub working_directory: PathBuf,
    pub attachments: Vec<String>,
    /// Line-delimited streaming records vs one JSON document
    pub streaming: bool,
    /// Per-call progress channel; None when nobody is listening
    pub progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

#[derive(Debug, Clone)]
pub struct PromptResult {
    /// The authoritative session id, as reported by the tool
    pub session_id: String,
    pub success: bool,
    pub result: String,
    pub source: ResultSource,
}

/// Outcome of a kill request
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct KillOutcome {
    pub success: bool,
    pub process_killed: bool,
    pub session_cleaned: bool,
}

/// Assistant CLI client
pub struct ClaudeClient {
    /// Path to the assistant CLI binary
    claude_path: String,
    /// Live processes: session id -> child
    processes: Arc<Mutex<HashMap<String, Child>>>,
    /// Known provider session ids: session id -> the tool's own id
    provider_ids: Arc<Mutex<HashMap<String, String>>>,
}

impl ClaudeClient {
    pub fn new(claude_path: impl Into<String>) -> Self {
        Self {
            claude_path: claude_path.into(),
            processes: Arc::new(Mutex::new(HashMap::new())),
            provider_ids: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn claude_path(&self) -> &str {
        &self.claude_path
    }

    /// Run one prompt to completion. A known provider session id makes the
    /// tool resume the same context rather than starting fresh.
    pub async fn send_prompt(&self, request: PromptRequest) -> Result<PromptResult, ProcessError> {
        let resume_id = self
            .provider_ids
            .lock()
            .await
            .get(&request.session_id)
            .cloned();

        let mut cmd = Command::new(&self.claude_path);
        cmd.arg("-p");
        cmd.arg("--output-format");
        if request.streaming {
            cmd.arg("stream-json");
            cmd.arg("--verbose");
        } else {
            cmd.arg("json");
        }
        if let Some(ref resume) = resume_id {
            cmd.arg("--resume");
            cmd.arg(resume);
        }
        cmd.current_dir(&request.working_directory);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(
            session_id = %request.session_id,
            request_id = %request.request_id,
            resuming = resume_id.is_some(),
            streaming = request.streaming,
            "Starting assistant process"
        );

        let mut child = cmd.spawn().map_err(|e| ProcessError::from_spawn(&e))?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            ProcessError::new(ProcessErrorKind::ProcessingError, "failed to open stdin")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ProcessError::new(ProcessErrorKind::ProcessingError, "failed to open stdout")
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            ProcessError::new(ProcessErrorKind::ProcessingError, "failed to open stderr")
        })?;

        // Park the child where kill_session can reach it while we stream
        self.processes
            .lock()
            .await
            .insert(request.session_id.clone(), child);

        let started = Instant::now();
        send_progress(&request.progress, ProgressKind::Starting, started, 0);

        let prompt = build_prompt(&request.text, &request.attachments);
        let write_result = async {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await
        }
        .await;
        drop(stdin);

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let outcome = if request.streaming {
            self.consume_stream(&request, stdout, started).await
        } else {
            self.consume_document(stdout).await
        };

        // Reap the process before deciding anything
        let child = self.processes.lock().await.remove(&request.session_id);
        let status = match child {
            Some(mut child) => child.wait().await.ok(),
            None => None, // killed out from under us
        };
        let stderr_text = stderr_task.await.unwrap_or_default();

        if let Err(e) = write_result {
            return Err(ProcessError::new(
                ProcessErrorKind::ProcessingError,
                format!("failed to write prompt: {}", e),
            ));
        }

        let consumed = outcome?;

        let exited_ok = status.map(|s| s.success()).unwrap_or(false);
        if !exited_ok && consumed.final_text.is_none() {
            return Err(ProcessError::from_process_output(
                &stderr_text,
                status.and_then(|s| s.code()),
            ));
        }

        if consumed.is_error {
            let detail = consumed
                .final_text
                .unwrap_or_else(|| "assistant reported an error".to_string());
            return Err(ProcessError::from_process_output(&detail, None));
        }

        let (result, source) = consumed.final_text.zip(consumed.source).ok_or_else(|| {
            ProcessError::new(
                ProcessErrorKind::ProcessingError,
                "assistant produced no extractable result",
            )
        })?;

        // The tool's reported id is authoritative; a mismatch with what we
        // asked to resume gets logged and adopted.
        let session_id = match consumed.provider_session_id {
            Some(reported) => {
                if let Some(ref expected) = resume_id {
                    if *expected != reported {
                        warn!(
                            session_id = %request.session_id,
                            expected = %expected,
                            reported = %reported,
                            "Provider session id mismatch, adopting reported id"
                        );
                    }
                }
                self.provider_ids
                    .lock()
                    .await
                    .insert(request.session_id.clone(), reported.clone());
                reported
            }
            None => resume_id.unwrap_or_else(|| request.session_id.clone()),
        };

        info!(
            session_id = %request.session_id,
            request_id = %request.request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            source = ?source,
            "Prompt completed"
        );

        Ok(PromptResult {
            session_id,
            success: true,
            result,
            source,
        })
    }

    async fn consume_stream(
        &self,
        request: &PromptRequest,
        stdout: tokio::process::ChildStdout,
        started: Instant,
    ) -> Result<Consumed, ProcessError> {
        let mut lines = BufReader::new(stdout).lines();
        let mut consumed = Consumed::default();
        let mut fragments: Vec<String> = Vec::new();
        let mut chars: u64 = 0;

        while let Some(line) = lines.next_line().await.map_err(|e| {
            ProcessError::new(ProcessErrorKind::ProcessingError, e.to_string())
        })? {
            if line.trim().is_empty() {
                continue;
            }
            let record: StreamRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, "Skipping unparseable stream line");
                    continue;
                }
            };

            match record {
                StreamRecord::System { session_id, .. } => {
                    if let Some(id) = session_id {
                        consumed.provider_session_id = Some(id);
                    }
                }
                StreamRecord::Assistant { message } => {
                    for block in message.content {
                        match block {
                            ContentBlock::Text { text } => {
                                chars += text.chars().count() as u64;
                                send_progress(
                                    &request.progress,
                                    ProgressKind::TextChunk {
                                        preview: preview(&text, PREVIEW_CHARS),
                                    },
                                    started,
                                    chars,
                                );
                                fragments.push(text);
                            }
                            ContentBlock::ToolUse { name } => {
                                send_progress(
                                    &request.progress,
                                    ProgressKind::ToolUse { name },
                                    started,
                                    chars,
                                );
                            }
                            ContentBlock::Thinking { .. } | ContentBlock::Other => {}
                        }
                    }
                }
                StreamRecord::Result {
                    is_error,
                    result,
                    session_id,
                    ..
                } => {
                    consumed.is_error = is_error;
                    if let Some(id) = session_id {
                        consumed.provider_session_id = Some(id);
                    }
                    if let Some(result) = result {
                        consumed.final_text = Some(result);
                        consumed.source = Some(ResultSource::Envelope);
                    }
                }
                StreamRecord::User {} | StreamRecord::Other => {}
            }
        }

        if consumed.final_text.is_none() && !fragments.is_empty() {
            consumed.final_text = Some(fragments.join(""));
            consumed.source = Some(ResultSource::Fragments);
        }
        Ok(consumed)
    }

    async fn consume_document(
        &self,
        mut stdout: tokio::process::ChildStdout,
    ) -> Result<Consumed, ProcessError> {
        let mut raw = String::new();
        stdout
            .read_to_string(&mut raw)
            .await
            .map_err(|e| ProcessError::new(ProcessErrorKind::ProcessingError, e.to_string()))?;

        let mut consumed = Consumed::default();
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => {
                consumed.is_error = value
                    .get("is_error")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                consumed.provider_session_id = value
                    .get("session_id")
                    .and_then(serde_json::Value::as_str)
                    .map(|s| s.to_string());
                if let Some((text, source)) = extract_final_text(&value) {
                    consumed.final_text = Some(text);
                    consumed.source = Some(source);
                }
            }
            Err(_) if !raw.trim().is_empty() => {
                // Not JSON at all; take the raw text as the answer
                consumed.final_text = Some(raw.trim().to_string());
                consumed.source = Some(ResultSource::Direct);
            }
            Err(_) => {}
        }
        Ok(consumed)
    }

    /// True while a process is live for this session
    pub async fn is_running(&self, session_id: &str) -> bool {
        let mut processes = self.processes.lock().await;
        match processes.get_mut(session_id) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminate the session's process if one is running. A no-op kill
    /// reports success:false rather than erroring.
    pub async fn kill_session(&self, session_id: &str, reason: &str) -> KillOutcome {
        let child = self.processes.lock().await.remove(session_id);
        let process_killed = match child {
            Some(mut child) => {
                if let Err(e) = child.start_kill() {
                    warn!(session_id = %session_id, error = %e, "Failed to kill process");
                }
                let _ = child.wait().await;
                info!(session_id = %session_id, reason = %reason, "Killed assistant process");
                true
            }
            None => false,
        };

        let session_cleaned = self.provider_ids.lock().await.remove(session_id).is_some();

        KillOutcome {
            success: process_killed,
            process_killed,
            session_cleaned,
        }
    }

    /// Check that the assistant CLI is available
    pub async fn health_check(&self) -> bool {
        match Command::new(&self.claude_path)
            .arg("--version")
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                warn!("Assistant CLI health check failed: {}", e);
                false
            }
        }
    }
}

#[derive(Default)]
struct Consumed {
    final_text: Option<String>,
    source: Option<ResultSource>,
    provider_session_id: Option<String>,
    is_error: bool,
}

fn build_prompt(text: &str, attachments: &[String]) -> String {
    if attachments.is_empty() {
        return text.to_string();
    }
    let mut prompt = String::from(text);
    prompt.push_str("\n\nAttached files:\n");
    for path in attachments {
        prompt.push_str("- ");
        prompt.push_str(path);
        prompt.push('\n');
    }
    prompt
}

fn send_progress(
    sender: &Option<mpsc::UnboundedSender<ProgressEvent>>,
    kind: ProgressKind,
    started: Instant,
    chars: u64,
) {
    if let Some(sender) = sender {
        // Receiver may be gone; progress is best-effort
        let _ = sender.send(ProgressEvent {
            kind,
            elapsed_ms: started.elapsed().as_millis() as u64,
            chars,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_attachments() {
        let prompt = build_prompt("review this", &["a.png".into(), "b.txt".into()]);
        assert!(prompt.starts_with("review this"));
        assert!(prompt.contains("- a.png"));
        assert!(prompt.contains("- b.txt"));
    }

    #[tokio::test]
    async fn kill_with_nothing_running_is_a_safe_noop() {
        let client = ClaudeClient::new("claude");
        let outcome = client.kill_session("missing", "test").await;
        assert!(!outcome.success);
        assert!(!outcome.process_killed);
        assert!(!outcome.session_cleaned);
    }

    #[tokio::test]
    async fn is_running_false_for_unknown_session() {
        let client = ClaudeClient::new("claude");
        assert!(!client.is_running("missing").await);
    }
}
