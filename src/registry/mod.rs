//! Session tracking and buffered history

pub mod buffer;
pub mod session;

pub use buffer::{BufferedMessage, SessionBuffer, ThinkingState};
pub use session::{ExpiryTier, ExpiryTransition, SessionInfo, SessionRegistry};
