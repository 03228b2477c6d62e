//! Codebridge - bridges mobile clients to local coding agent sessions with
//! asynchronous push delivery

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codebridge=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Codebridge v{}", env!("CARGO_PKG_VERSION"));

    // Run CLI
    codebridge::cli::run()?;

    Ok(())
}
