use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::info;

use crate::engine::{Engine, EngineError};
use crate::observability;

/// Background task that moves finished approved borrows into history.
pub async fn run_archiver(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = chrono::Utc::now().date_naive();
        match sweep(&engine, today).await {
            Ok(0) => {}
            Ok(n) => info!("archived {n} finished borrows"),
            Err(e) => tracing::warn!("archive sweep failed: {e}"),
        }
    }
}

/// Archive every approved borrow whose span ended before `today`.
/// Returns how many history records were written by this sweep.
pub async fn sweep(engine: &Engine, today: NaiveDate) -> Result<usize, EngineError> {
    let due = engine.due_for_archive(today).await?;
    let mut archived = 0;
    for request_id in due {
        match engine.archive(request_id).await {
            Ok(_) => {
                archived += 1;
                metrics::counter!(observability::ARCHIVED_TOTAL).increment(1);
            }
            Err(e) if e.is_client_error() => {
                // Someone else archived or changed it in between.
                tracing::debug!("archiver skip {request_id}: {e}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(archived)
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compacted after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
