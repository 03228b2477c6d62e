//! Codebridge - bridges mobile clients to local coding agent sessions with
//! asynchronous push delivery

pub mod cli;
pub mod config;
pub mod core;
pub mod delivery;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod registry;
