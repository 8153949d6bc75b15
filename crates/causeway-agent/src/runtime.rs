//! Agent runtime orchestration.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use causeway_adapter_gcloud::{PubsubClient, PubsubConfig};
use causeway_adapter_redis::RedisBus;
use causeway_core::RelayEngine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The main agent runtime.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Connect both buses and run the relay until a shutdown signal
    /// arrives or a fatal error stops it.
    ///
    /// # Errors
    ///
    /// Returns error if a bus cannot be reached, provisioning fails, or
    /// the relay exits on a fatal error.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let local = RedisBus::connect(&self.config.local_bus_uri)
            .await
            .context("Failed to connect to the local bus")?;
        tracing::info!(uri = %self.config.local_bus_uri, "Connected to local bus");

        let bearer_token = self.config.bearer_token()?;
        let cloud = PubsubClient::new(PubsubConfig {
            project_id: self.config.cloud.project_id.clone(),
            endpoint: self.config.cloud.endpoint.clone(),
            bearer_token,
            ..Default::default()
        })
        .context("Failed to create Pub/Sub client")?;

        let engine = RelayEngine::new(
            Arc::new(local),
            Arc::new(cloud),
            self.config.topics.clone(),
            self.config.ack_deadline(),
        );

        let shutdown = CancellationToken::new();
        let mut relay = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { engine.run(shutdown).await }
        });

        tracing::info!("Agent running, press Ctrl+C to stop");

        tokio::select! {
            result = &mut relay => {
                result.context("Relay task panicked")??;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
                relay.await.context("Relay task panicked")??;
            }
        }

        tracing::info!("Agent stopped");
        Ok(())
    }
}
