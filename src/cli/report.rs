// ABOUTME: Shared output helpers for pool metrics in text and JSON form

use anyhow::Result;
use serde::Serialize;

use paysock::socket_pool::MetricsSnapshot;

/// Print any serializable report as pretty JSON
pub fn output_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Print global counters and a per-pool table
pub fn output_metrics_text(metrics: &MetricsSnapshot) {
    println!(
        "connections: {} created, {} active, {} failed, {} reconnections",
        metrics.total_connections,
        metrics.active_connections,
        metrics.failed_connections,
        metrics.reconnections
    );
    if let Some(at) = metrics.last_cleanup {
        println!("last cleanup: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if metrics.pools.is_empty() {
        println!("No pools.");
        return;
    }

    println!();
    println!(
        "{:<32} {:>6} {:>6} {:>8} {:>8} {:>8}",
        "POOL", "ACTIVE", "IDLE", "WAITING", "CREATED", "FAILED"
    );
    println!("{}", "-".repeat(73));

    let mut pools: Vec<_> = metrics.pools.iter().collect();
    pools.sort_by(|a, b| a.key.cmp(&b.key));
    for pool in pools {
        println!(
            "{:<32} {:>6} {:>6} {:>8} {:>8} {:>8}",
            truncate(&pool.key, 32),
            pool.active,
            pool.idle,
            pool.waiting,
            pool.metrics.total_connections,
            pool.metrics.failures
        );
    }
}

/// Truncate a string to fit in the given width (character-aware for UTF-8)
pub fn truncate(s: &str, max_len: usize) -> String {
    if max_len <= 3 {
        return ".".repeat(max_len);
    }
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}
