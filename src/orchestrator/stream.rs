//! Streamed record protocol and final-answer extraction

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the assistant CLI's record-delimited output
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: AssistantMessage,
    },
    User {},
    Result {
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// Which extraction strategy produced the final answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// A direct top-level text field
    Direct,
    /// A structured envelope's result field
    Envelope,
    /// Concatenated discrete fragments
    Fragments,
}

/// Side-channel progress emitted while a prompt runs, keyed upstream by
/// request id
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub kind: ProgressKind,
    pub elapsed_ms: u64,
    pub chars: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressKind {
    Starting,
    TextChunk { preview: String },
    ToolUse { name: String },
}

/// Extract the final answer from a complete JSON document, trying the
/// cheapest shape first: a direct top-level text field, then a structured
/// envelope's result field, then a scan over discrete fragments (needed for
/// streaming captures where tool-use and text records interleave).
pub fn extract_final_text(value: &Value) -> Option<(String, ResultSource)> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        return Some((text.to_string(), ResultSource::Direct));
    }

    if let Some(result) = value.get("result").and_then(Value::as_str) {
        return Some((result.to_string(), ResultSource::Envelope));
    }

    let fragments = value
        .as_array()
        .or_else(|| value.get("messages").and_then(Value::as_array))?;

    let mut parts: Vec<String> = Vec::new();
    for fragment in fragments {
        match fragment.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = fragment.get("text").and_then(Value::as_str) {
                    parts.push(text.to_string());
                }
            }
            Some("assistant") | Some("message") => {
                collect_message_text(fragment, &mut parts);
            }
            Some("result") => {
                if let Some(result) = fragment.get("result").and_then(Value::as_str) {
                    parts.push(result.to_string());
                }
            }
            _ => {}
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some((parts.join("\n"), ResultSource::Fragments))
    }
}

fn collect_message_text(fragment: &Value, parts: &mut Vec<String>) {
    // Either a plain content string or nested content blocks
    if let Some(content) = fragment.get("content").and_then(Value::as_str) {
        parts.push(content.to_string());
        return;
    }
    let blocks = fragment
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| fragment.get("content"))
        .and_then(Value::as_array);
    if let Some(blocks) = blocks {
        for block in blocks {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    parts.push(text.to_string());
                }
            }
        }
    }
}

/// Short preview of a text chunk for progress notifications
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}
