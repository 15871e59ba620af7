use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::Ms;

/// One pass of the sweep: force-complete confirmed bookings whose
/// interval has passed, and reject pending bookings the owner never
/// answered within the confirmation deadline.
pub async fn sweep_once(engine: &Engine, now: Ms) {
    for (booking_id, space_id) in engine.collect_overdue(now) {
        match engine.complete_booking(booking_id, now, true).await {
            Ok(_) => {
                metrics::counter!(crate::observability::BOOKINGS_SWEPT_TOTAL, "kind" => "completed")
                    .increment(1);
                info!("swept overdue booking {booking_id} on space {space_id} to completed");
            }
            Err(e) => {
                // May have transitioned concurrently — that's fine
                tracing::debug!("sweep skip {booking_id}: {e}");
            }
        }
    }

    for (booking_id, space_id) in engine.collect_stale_pending(now) {
        match engine.reject_booking(booking_id).await {
            Ok(_) => {
                metrics::counter!(crate::observability::BOOKINGS_SWEPT_TOTAL, "kind" => "rejected")
                    .increment(1);
                info!("swept stale pending booking {booking_id} on space {space_id} to rejected");
            }
            Err(e) => {
                tracing::debug!("sweep skip {booking_id}: {e}");
            }
        }
    }
}

/// Background task that periodically runs the completion sweep.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms;
        sweep_once(&engine, now).await;
    }
}
