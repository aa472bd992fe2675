//! Run command implementation.

use crate::server::{start_server, ServerState};
use anyhow::Result;
use k2k_core::engine::PipelineEngine;
use k2k_core::Config;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Command-line overrides applied on top of the config file.
#[derive(clap::Args, Debug, Default)]
pub struct Overrides {
    /// Kafka bootstrap servers (comma-separated)
    #[arg(long)]
    pub bootstrap_servers: Option<String>,

    /// Topic to consume from
    #[arg(long)]
    pub input_topic: Option<String>,

    /// Topic for processed records
    #[arg(long)]
    pub output_topic: Option<String>,

    /// Topic for rejected payloads
    #[arg(long)]
    pub dlq_topic: Option<String>,

    /// Consumer group ID
    #[arg(long)]
    pub consumer_group: Option<String>,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(servers) = self.bootstrap_servers {
            config.kafka.bootstrap_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(topic) = self.input_topic {
            config.kafka.input_topic = topic;
        }
        if let Some(topic) = self.output_topic {
            config.kafka.output_topic = topic;
        }
        if let Some(topic) = self.dlq_topic {
            config.kafka.dlq_topic = topic;
        }
        if let Some(group) = self.consumer_group {
            config.kafka.consumer_group = group;
        }
    }
}

/// Run the pipeline until SIGINT/SIGTERM or a fatal consumer error.
pub async fn run(mut config: Config, overrides: Overrides) -> Result<()> {
    overrides.apply(&mut config);
    config.validate()?;

    info!(
        input = %config.kafka.input_topic,
        output = %config.kafka.output_topic,
        dlq = %config.kafka.dlq_topic,
        group = %config.kafka.consumer_group,
        "Starting pipeline"
    );

    let health_port = config.monitoring.health_port;
    let metrics_port = config.monitoring.metrics_port;

    let mut engine = PipelineEngine::connect(config).await?;
    let shutdown_tx = engine.shutdown_signal();

    let server_state = Arc::new(ServerState {
        health: Arc::clone(engine.health()),
        metrics: Arc::clone(engine.metrics()),
    });

    tokio::spawn(start_server(
        server_state,
        health_port,
        metrics_port,
        shutdown_tx.subscribe(),
    ));

    tokio::spawn(wait_for_signal(shutdown_tx));

    engine.run().await?;

    info!("Pipeline stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
    }

    let _ = shutdown.send(());
}
