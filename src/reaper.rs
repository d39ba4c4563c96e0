use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::Actor;

pub const EXPIRY_REASON: &str = "pending reservation expired";

/// One sweep: cancel every `pendiente` reservation older than `ttl`.
/// Returns how many were cancelled.
pub async fn expire_pending(engine: &Engine, ttl: chrono::Duration) -> usize {
    let now = engine.clock().now();
    let stale = engine.collect_stale_pending(now, ttl);
    let mut cancelled = 0;
    for (reservation_id, room_id) in stale {
        match engine
            .cancel(&Actor::SYSTEM, reservation_id, Some(EXPIRY_REASON.to_string()))
            .await
        {
            Ok(_) => {
                cancelled += 1;
                metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL).increment(1);
                info!(%reservation_id, %room_id, "expired pending reservation");
            }
            // Stay already begun, or someone confirmed/cancelled it meanwhile
            Err(e @ (EngineError::PastCheckin(_) | EngineError::InvalidStateTransition { .. })) => {
                debug!(%reservation_id, "reaper skip: {e}");
            }
            Err(e) => warn!(%reservation_id, "reaper failed: {e}"),
        }
    }
    cancelled
}

/// Background task that periodically expires unpaid reservations.
pub async fn run_reaper(engine: Arc<Engine>, ttl: chrono::Duration, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        expire_pending(&engine, ttl).await;
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!(appends, "WAL compacted"),
                Err(e) => warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
