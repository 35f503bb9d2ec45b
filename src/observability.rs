use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "borrowd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "borrowd_query_duration_seconds";

// ── Lifecycle ───────────────────────────────────────────────────

/// Counter: committed lifecycle events. Labels: event.
pub const TRANSITIONS_TOTAL: &str = "borrowd_transitions_total";

/// Counter: approvals refused because an overlapping request was already approved.
pub const APPROVAL_CONFLICTS_TOTAL: &str = "borrowd_approval_conflicts_total";

/// Counter: item lock waits that hit the configured timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "borrowd_lock_timeouts_total";

/// Counter: borrows moved to history by the background archiver.
pub const ARCHIVED_TOTAL: &str = "borrowd_archived_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "borrowd_connections_active";
pub const CONNECTIONS_TOTAL: &str = "borrowd_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "borrowd_connections_rejected_total";

/// Gauge: number of loaded tenants.
pub const TENANTS_ACTIVE: &str = "borrowd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "borrowd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "borrowd_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used in metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SubmitRequest { .. } => "submit",
        Command::ApproveRequest { .. } => "approve",
        Command::DenyRequest { .. } => "deny",
        Command::SelectRequests { .. } => "select_requests",
        Command::ArchiveRequest { .. } => "archive",
        Command::SelectHistory { .. } => "select_history",
        Command::Listen { .. } => "listen",
    }
}
