use std::net::SocketAddr;

// ── Queue operations ────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "waitlist_reservations_created_total";

/// Counter: reservations deleted (fulfilled, cancelled or expired).
pub const RESERVATIONS_DELETED_TOTAL: &str = "waitlist_reservations_deleted_total";

/// Counter: reservations released because their priority deadline passed.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "waitlist_reservations_expired_total";

// ── Per-book locking ────────────────────────────────────────────

/// Histogram: time spent waiting for a book's lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "waitlist_lock_wait_seconds";

/// Counter: lock acquisitions that gave up.
pub const LOCK_TIMEOUTS_TOTAL: &str = "waitlist_lock_timeouts_total";

// ── Notifications ───────────────────────────────────────────────

/// Counter: priority notices delivered.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "waitlist_notifications_sent_total";

/// Counter: priority notices that failed to deliver.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "waitlist_notification_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "waitlist_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "waitlist_wal_flush_batch_size";

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
