//! Service composition

pub mod bridge;
pub mod handler;

pub use bridge::{Bridge, BridgeStatus, KillReport};
pub use handler::PromptHandler;
