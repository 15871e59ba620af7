use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking requests by outcome. Labels: status.
pub const BOOKINGS_REQUESTED_TOTAL: &str = "kerb_bookings_requested_total";

/// Histogram: admission latency in seconds (lock wait included).
pub const ADMISSION_DURATION_SECONDS: &str = "kerb_admission_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered spaces.
pub const SPACES_ACTIVE: &str = "kerb_spaces_active";

/// Counter: exclusivity-acquisition attempts that hit the bounded wait.
pub const LOCK_TIMEOUTS_TOTAL: &str = "kerb_lock_timeouts_total";

/// Counter: bookings transitioned by the sweep. Labels: kind.
pub const BOOKINGS_SWEPT_TOTAL: &str = "kerb_bookings_swept_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "kerb_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "kerb_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
