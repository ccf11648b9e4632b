use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, now_ms};

/// Background task that voids unpaid packages once their payment window closes.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reap_once(&engine, now_ms()).await;
    }
}

/// One sweep; returns how many packages were voided.
pub async fn reap_once(engine: &Engine, now: i64) -> usize {
    let mut voided = 0;
    for package_id in engine.collect_expired_holds(now) {
        match engine.void_expired_package(package_id, now).await {
            Ok(true) => {
                info!("voided unpaid package {package_id}, slots released");
                voided += 1;
            }
            // Paid or cancelled between the scan and the lock.
            Ok(false) => {}
            Err(e) => tracing::debug!("reaper skip {package_id}: {e}"),
        }
    }
    voided
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}
