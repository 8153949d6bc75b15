//! # Causeway Agent
//!
//! Bidirectional relay between a colocated Redis bus and Google Cloud
//! Pub/Sub.
//!
//! ## Architecture
//!
//! The agent runs one relay engine with two kinds of pump:
//! 1. **Local → cloud**: a single task drains the local subscription and
//!    publishes to the provisioned cloud topics
//! 2. **Cloud → local**: one task per subscription pulls, republishes
//!    locally, then acknowledges
//!
//! Every relayed payload is wrapped with the origin of the bus it came
//! from, and each pump drops payloads already tagged with its own origin,
//! so a message crosses the bridge at most once.

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Causeway");

    // Load configuration
    let config_path = std::env::var("CAUSEWAY_CONFIG").ok().map(PathBuf::from);
    let config = AgentConfig::load(config_path.as_deref())?;

    tracing::info!(
        local_bus = %config.local_bus_uri,
        project = %config.cloud.project_id,
        topics = config.topics.len(),
        "Configuration loaded"
    );

    Agent::new(config).run().await
}
