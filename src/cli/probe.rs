// ABOUTME: CLI probe command - acquire one pooled connection and report on it
//
// Connects to the configured real-time server (or --endpoint), joins the
// key's room, emits a single event and prints connection timing plus the
// resulting pool metrics.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

use super::{OutputFormat, ProbeArgs};
use paysock::config::AppConfig;
use paysock::socket_pool::{MetricsSnapshot, SocketPoolManager, TcpTransport};

/// JSON output structure for the probe command
#[derive(Debug, Serialize)]
pub struct ProbeOutput {
    pub key: String,
    pub endpoint: String,
    pub connection_id: String,
    pub acquire_ms: u64,
    pub event: String,
    pub metrics: MetricsSnapshot,
}

/// Execute the probe command
pub async fn execute(config: &AppConfig, args: ProbeArgs, format: OutputFormat) -> Result<()> {
    let output = probe(config, &args).await?;

    match format {
        OutputFormat::Json => super::report::output_json(&output)?,
        OutputFormat::Text => {
            println!(
                "Connected to {} for '{}' in {} ms (connection {})",
                output.endpoint, output.key, output.acquire_ms, output.connection_id
            );
            println!("Emitted '{}'", output.event);
            println!();
            super::report::output_metrics_text(&output.metrics);
        }
    }

    Ok(())
}

/// Acquire, use and release a single connection for `args.key`
pub async fn probe(config: &AppConfig, args: &ProbeArgs) -> Result<ProbeOutput> {
    let mut transport_config = config.transport.clone();
    if let Some(ref endpoint) = args.endpoint {
        transport_config.endpoint = endpoint.clone();
    }
    let endpoint = transport_config.endpoint.clone();

    let manager = SocketPoolManager::new(config.pool.clone(), TcpTransport::new(transport_config))?;
    manager.start()?;

    let started = Instant::now();
    let result = async {
        let mut conn = manager
            .acquire_connection(&args.key)
            .await
            .with_context(|| format!("Failed to acquire a connection to {endpoint}"))?;
        let acquire_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        conn.emit(
            &args.event,
            serde_json::json!({ "room": args.key, "sent_at": Utc::now() }),
        )
        .await
        .with_context(|| format!("Failed to emit '{}'", args.event))?;

        let connection_id = conn.id().to_string();
        manager.release_connection(conn);
        info!(key = %args.key, endpoint = %endpoint, acquire_ms, "Probe succeeded");

        Ok::<_, anyhow::Error>((connection_id, acquire_ms))
    }
    .await;

    let metrics = manager.get_pool_metrics();
    manager.stop().await?;
    let (connection_id, acquire_ms) = result?;

    Ok(ProbeOutput {
        key: args.key.clone(),
        endpoint,
        connection_id,
        acquire_ms,
        event: args.event.clone(),
        metrics,
    })
}
