use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "staydesk_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "staydesk_query_duration_seconds";

// ── Reservation lifecycle ───────────────────────────────────────

/// Counter: reservations created. Labels: mode (nightly, hourly).
pub const RESERVATIONS_CREATED_TOTAL: &str = "staydesk_reservations_created_total";

/// Counter: booking attempts rejected because the stay was already held.
pub const BOOKING_CONFLICTS_TOTAL: &str = "staydesk_booking_conflicts_total";

/// Counter: applied state transitions. Labels: transition.
pub const TRANSITIONS_TOTAL: &str = "staydesk_transitions_total";

/// Counter: pending reservations cancelled by the expiry reaper.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "staydesk_reservations_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "staydesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "staydesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staydesk_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "staydesk_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "staydesk_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staydesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staydesk_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom(_) => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::InsertReservation(req) => match req.stay.mode() {
            crate::model::BookingMode::Nightly => "insert_reservation",
            crate::model::BookingMode::Hourly => "insert_day_use_reservation",
        },
        Command::UpdateReservation { .. } => "update_reservation",
        Command::SelectReservations(_) => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectStats { .. } => "select_stats",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
