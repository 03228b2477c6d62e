//! Tests for the assistant process client, driven by a stub CLI script

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::TempDir;
use tokio::sync::mpsc;

use codebridge::error::ProcessErrorKind;
use codebridge::orchestrator::{
    ClaudeClient, ProgressEvent, ProgressKind, PromptRequest, ResultSource,
};

/// Write an executable shell script that stands in for the assistant CLI.
/// Every stub drains stdin first so writing the prompt never breaks the pipe.
fn stub_cli(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("assistant-stub");
    std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().to_string()
}

fn request(
    workdir: &Path,
    session_id: &str,
    streaming: bool,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
) -> PromptRequest {
    PromptRequest {
        text: "do the thing".to_string(),
        session_id: session_id.to_string(),
        request_id: "req-1".to_string(),
        working_directory: workdir.to_path_buf(),
        attachments: Vec::new(),
        streaming,
        progress,
    }
}

#[tokio::test]
async fn streaming_prompt_returns_result_and_emits_progress() {
    let dir = TempDir::new().unwrap();
    let stub = stub_cli(
        &dir,
        r#"echo '{"type":"system","subtype":"init","session_id":"prov-1"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"working on it"}]}}'
echo '{"type":"assistant","message":{"content":[{"type":"tool_use","name":"read_file"}]}}'
echo '{"type":"result","is_error":false,"result":"final answer","session_id":"prov-1"}'"#,
    );

    let client = ClaudeClient::new(stub);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = client
        .send_prompt(request(dir.path(), "s1", true, Some(tx)))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.result, "final answer");
    assert_eq!(result.source, ResultSource::Envelope);
    assert_eq!(result.session_id, "prov-1");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events[0].kind, ProgressKind::Starting));
    assert!(events.iter().any(|e| matches!(
        e.kind,
        ProgressKind::TextChunk { ref preview } if preview == "working on it"
    )));
    assert!(events.iter().any(|e| matches!(
        e.kind,
        ProgressKind::ToolUse { ref name } if name == "read_file"
    )));
}

#[tokio::test]
async fn stream_without_result_record_falls_back_to_fragments() {
    let dir = TempDir::new().unwrap();
    let stub = stub_cli(
        &dir,
        r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"part one, "}]}}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"part two"}]}}'"#,
    );

    let client = ClaudeClient::new(stub);
    let result = client
        .send_prompt(request(dir.path(), "s1", true, None))
        .await
        .unwrap();

    assert_eq!(result.result, "part one, part two");
    assert_eq!(result.source, ResultSource::Fragments);
}

#[tokio::test]
async fn second_prompt_resumes_with_provider_session_id() {
    let dir = TempDir::new().unwrap();
    // Reflects the argv back so the test can see whether --resume was passed
    let stub = stub_cli(
        &dir,
        r#"printf '{"type":"system","session_id":"prov-7"}\n'
printf '{"type":"result","is_error":false,"result":"args: %s"}\n' "$*""#,
    );

    let client = ClaudeClient::new(stub);
    let first = client
        .send_prompt(request(dir.path(), "s1", true, None))
        .await
        .unwrap();
    assert!(!first.result.contains("--resume"));

    let second = client
        .send_prompt(request(dir.path(), "s1", true, None))
        .await
        .unwrap();
    assert!(second.result.contains("--resume prov-7"));
}

#[tokio::test]
async fn failing_process_is_classified_from_stderr() {
    let dir = TempDir::new().unwrap();
    let stub = stub_cli(
        &dir,
        r#"echo 'Error: rate limit exceeded (429)' >&2
exit 1"#,
    );

    let client = ClaudeClient::new(stub);
    let err = client
        .send_prompt(request(dir.path(), "s1", true, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProcessErrorKind::RateLimit);
    assert!(err.message.contains("rate limit"));
}

#[tokio::test]
async fn error_result_record_surfaces_as_classified_error() {
    let dir = TempDir::new().unwrap();
    let stub = stub_cli(
        &dir,
        r#"echo '{"type":"result","is_error":true,"result":"connection to upstream refused"}'"#,
    );

    let client = ClaudeClient::new(stub);
    let err = client
        .send_prompt(request(dir.path(), "s1", true, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProcessErrorKind::ConnectionError);
}

#[tokio::test]
async fn document_mode_reads_one_json_envelope() {
    let dir = TempDir::new().unwrap();
    let stub = stub_cli(
        &dir,
        r#"printf '{"result":"doc answer","is_error":false,"session_id":"prov-9"}'"#,
    );

    let client = ClaudeClient::new(stub);
    let result = client
        .send_prompt(request(dir.path(), "s1", false, None))
        .await
        .unwrap();

    assert_eq!(result.result, "doc answer");
    assert_eq!(result.source, ResultSource::Envelope);
    assert_eq!(result.session_id, "prov-9");
}

#[tokio::test]
async fn non_json_document_is_taken_verbatim() {
    let dir = TempDir::new().unwrap();
    let stub = stub_cli(&dir, r#"printf 'plain text answer'"#);

    let client = ClaudeClient::new(stub);
    let result = client
        .send_prompt(request(dir.path(), "s1", false, None))
        .await
        .unwrap();

    assert_eq!(result.result, "plain text answer");
    assert_eq!(result.source, ResultSource::Direct);
}

#[tokio::test]
async fn missing_binary_maps_to_service_not_found() {
    let dir = TempDir::new().unwrap();
    let client = ClaudeClient::new("/nonexistent/assistant-cli");
    let err = client
        .send_prompt(request(dir.path(), "s1", true, None))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProcessErrorKind::ServiceNotFound);
}

#[tokio::test]
async fn kill_after_completion_reports_no_process_but_cleans_session() {
    let dir = TempDir::new().unwrap();
    let stub = stub_cli(
        &dir,
        r#"echo '{"type":"system","session_id":"prov-2"}'
echo '{"type":"result","is_error":false,"result":"ok"}'"#,
    );

    let client = ClaudeClient::new(stub);
    client
        .send_prompt(request(dir.path(), "s1", true, None))
        .await
        .unwrap();

    let outcome = client.kill_session("s1", "test").await;
    assert!(!outcome.success);
    assert!(!outcome.process_killed);
    assert!(outcome.session_cleaned);
}
