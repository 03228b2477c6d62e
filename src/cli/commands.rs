//! CLI commands

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::core::Bridge;
use crate::delivery::LogSink;
use crate::queue::{MessageMetadata, MessagePayload, Priority};

#[derive(Parser)]
#[command(name = "codebridge")]
#[command(about = "Bridges mobile clients to local coding agent sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config path (default: ~/.codebridge/config.yaml)
    #[arg(long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt through the queue and wait for the outcome
    Send {
        /// Session ID
        session_id: String,

        /// The prompt text
        text: String,

        /// Working directory for the session
        #[arg(long, default_value = ".")]
        working_dir: String,

        /// Priority (high, normal, low)
        #[arg(long, default_value = "normal")]
        priority: String,

        /// Originating device id
        #[arg(long)]
        device: Option<String>,
    },

    /// Kill a session and its process
    KillSession {
        /// Session ID
        session_id: String,
    },

    /// Show queue and session status
    Status,

    /// Check that the assistant CLI is available
    Health,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    // Create a multi-threaded runtime for CLI operations
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let bridge = Bridge::new(config, Arc::new(LogSink));

        match cli.command {
            Commands::Send {
                session_id,
                text,
                working_dir,
                priority,
                device,
            } => {
                let priority = Priority::from_str(&priority)?;
                let working_dir = PathBuf::from(working_dir).canonicalize()?;

                let metadata = MessageMetadata {
                    device_id: device,
                    ..Default::default()
                };
                let outcome = bridge
                    .submit(
                        &session_id,
                        &working_dir,
                        MessagePayload::text(text),
                        priority,
                        metadata,
                    )
                    .await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);

                if outcome.is_queued() {
                    if let Some(queue) = bridge.queues().find_queue(&session_id).await {
                        queue.drain().await;
                        let status = queue.status().await;
                        println!(
                            "processed: {}, failed: {}, dead-lettered: {}",
                            status.stats.processed, status.stats.failed, status.dead_letter_size
                        );
                    }
                }
                Ok(())
            }

            Commands::KillSession { session_id } => {
                let report = bridge.kill_session(&session_id, "killed via CLI").await;
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }

            Commands::Status => {
                let status = bridge.status().await;
                if status.sessions.is_empty() {
                    println!("No sessions");
                } else {
                    for session in &status.sessions {
                        println!(
                            "[{}] {} ({}) - {} user / {} assistant messages",
                            session.id.chars().take(8).collect::<String>(),
                            session.working_directory.display(),
                            session.expiry_tier.as_str(),
                            session.user_message_count,
                            session.assistant_message_count,
                        );
                    }
                }
                println!(
                    "queues: {}, pending: {}, dead-lettered: {}",
                    status.queues.queue_count,
                    status.queues.total_pending,
                    status.queues.total_dead_lettered
                );
                Ok(())
            }

            Commands::Health => {
                let healthy = bridge.orchestrator().health_check().await;
                println!(
                    "assistant CLI ({}): {}",
                    bridge.orchestrator().claude_path(),
                    if healthy { "ok" } else { "unavailable" }
                );
                Ok(())
            }
        }
    })
}
