//! External assistant process orchestration

pub mod client;
pub mod stream;

pub use client::{ClaudeClient, KillOutcome, PromptRequest, PromptResult};
pub use stream::{extract_final_text, ProgressEvent, ProgressKind, ResultSource, StreamRecord};
