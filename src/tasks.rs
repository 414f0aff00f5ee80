use crate::stores::{AppointmentStore, IdempotencyStore};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Background task that drops store entries older than `ttl`, sweeping every `ttl / 2`.
pub fn spawn_store_sweeper(
    processed: Arc<dyn IdempotencyStore>,
    appointments: Arc<dyn AppointmentStore>,
    ttl: Duration,
) -> JoinHandle<()> {
    let period = (ttl / 2).max(Duration::from_secs(1));
    info!(ttl_secs = ttl.as_secs(), period_secs = period.as_secs(), "store sweeper started");
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(processed.as_ref(), appointments.as_ref(), ttl);
        }
    })
}

fn sweep(processed: &dyn IdempotencyStore, appointments: &dyn AppointmentStore, ttl: Duration) {
    let calls = processed.evict_older_than(ttl);
    let bookings = appointments.evict_older_than(ttl);
    if calls + bookings > 0 {
        debug!(calls, bookings, "evicted expired store entries");
    }
}
