//! Retention worker: periodically deletes completed sessions, their logs and
//! alert records older than `retention.days`.

use firewatch_core::config::RetentionConfig;
use firewatch_core::store;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Called from main.rs when `[retention] enabled = true`.
pub async fn run_retention_loop(
    pool: SqlitePool,
    config: RetentionConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = Duration::from_secs(config.interval_hours.max(1) * 3600);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        days = config.days,
        interval_hours = config.interval_hours,
        "Retention loop started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_retention_sweep(&pool, config.days).await;
            }
            _ = shutdown.recv() => {
                tracing::info!("Retention loop shutting down");
                break;
            }
        }
    }
}

/// One sweep. Errors are logged; the next tick retries.
pub async fn run_retention_sweep(pool: &SqlitePool, days: u32) -> Option<u64> {
    match store::delete_old_records(pool, days).await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!(deleted, days, "Old detection records removed");
            } else {
                tracing::debug!(days, "Retention sweep: nothing to delete");
            }
            Some(deleted)
        }
        Err(e) => {
            tracing::error!(error = %e, "Retention sweep failed");
            None
        }
    }
}
