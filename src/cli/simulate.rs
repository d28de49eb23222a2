// ABOUTME: CLI simulate command - drive the pool with concurrent clients
//
// Starts a loopback server that accepts newline-delimited JSON sockets,
// then spawns `keys * clients` tasks that each acquire a connection, emit a
// payment status event, hold it for `hold_ms` and release it. The pool caps
// sockets per key at `pool.max_size` while the remaining clients queue.

use anyhow::{Context, Result};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{OutputFormat, SimulateArgs};
use paysock::config::AppConfig;
use paysock::socket_pool::{MetricsSnapshot, SocketPoolManager, TcpTransport};

/// JSON output structure for the simulate command
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub keys: usize,
    pub clients_per_key: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub server_connections: u64,
    pub server_messages: u64,
    pub metrics: MetricsSnapshot,
}

/// Local server counting accepted sockets and received lines
struct LoopbackServer {
    addr: SocketAddr,
    connections: Arc<AtomicU64>,
    messages: Arc<AtomicU64>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LoopbackServer {
    async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind loopback server")?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let messages = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&connections),
            Arc::clone(&messages),
            cancel.clone(),
        ));

        debug!(%addr, "Loopback server listening");
        Ok(Self {
            addr,
            connections,
            messages,
            cancel,
            handle,
        })
    }

    async fn shutdown(self) -> (u64, u64) {
        self.cancel.cancel();
        let _ = self.handle.await;
        (
            self.connections.load(Ordering::Relaxed),
            self.messages.load(Ordering::Relaxed),
        )
    }
}

async fn accept_loop(
    listener: TcpListener,
    connections: Arc<AtomicU64>,
    messages: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Loopback accept failed");
                        continue;
                    }
                };
                connections.fetch_add(1, Ordering::Relaxed);
                let messages = Arc::clone(&messages);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stream).lines();
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            line = lines.next_line() => match line {
                                Ok(Some(_)) => {
                                    messages.fetch_add(1, Ordering::Relaxed);
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    debug!(%peer, error = %e, "Loopback read failed");
                                    break;
                                }
                            },
                        }
                    }
                });
            }
        }
    }
}

/// Execute the simulate command
pub async fn execute(config: &AppConfig, args: SimulateArgs, format: OutputFormat) -> Result<()> {
    let report = simulate(config, &args).await?;

    match format {
        OutputFormat::Json => super::report::output_json(&report)?,
        OutputFormat::Text => {
            println!(
                "{} keys x {} clients: {} succeeded, {} failed in {} ms",
                report.keys,
                report.clients_per_key,
                report.succeeded,
                report.failed,
                report.elapsed_ms
            );
            println!(
                "server saw {} sockets and {} messages",
                report.server_connections, report.server_messages
            );
            println!();
            super::report::output_metrics_text(&report.metrics);
        }
    }

    Ok(())
}

/// Run the simulation against a fresh loopback server
pub async fn simulate(config: &AppConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    let server = LoopbackServer::bind().await?;

    let mut transport_config = config.transport.clone();
    transport_config.endpoint = server.addr.to_string();
    let manager = Arc::new(SocketPoolManager::new(
        config.pool.clone(),
        TcpTransport::new(transport_config),
    )?);
    manager.start()?;

    info!(keys = args.keys, clients = args.clients, "Starting simulation");
    let started = Instant::now();
    let hold = Duration::from_millis(args.hold_ms);

    let mut clients = JoinSet::new();
    for k in 0..args.keys {
        let key = format!("payment:sim-{k}");
        for client in 0..args.clients {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            clients.spawn(async move {
                let mut conn = manager.acquire_connection(&key).await?;
                conn.emit(
                    "payment-status",
                    serde_json::json!({ "room": key, "client": client, "status": "pending" }),
                )
                .await?;
                tokio::time::sleep(hold).await;
                manager.release_connection(conn);
                Ok::<_, anyhow::Error>(())
            });
        }
    }

    let mut succeeded = 0;
    let mut failed = 0;
    while let Some(joined) = clients.join_next().await {
        match joined {
            Ok(Ok(())) => succeeded += 1,
            Ok(Err(e)) => {
                warn!(error = %e, "Simulated client failed");
                failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "Simulated client panicked");
                failed += 1;
            }
        }
    }
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let metrics = manager.get_pool_metrics();
    manager.stop().await?;
    let (server_connections, server_messages) = server.shutdown().await;

    Ok(SimulationReport {
        keys: args.keys,
        clients_per_key: args.clients,
        succeeded,
        failed,
        elapsed_ms,
        server_connections,
        server_messages,
        metrics,
    })
}
