//! Process-local state shared between requests: which calls are done, and which calls booked an
//! appointment that the end-of-call report has not picked up yet.  Both sit behind traits so a
//! shared cache can replace them without touching the orchestrator.

use crate::types::AppointmentRecord;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub trait IdempotencyStore: Send + Sync {
    /// Claim `call_id` for processing.  Returns true for exactly one caller; every later or
    /// concurrent caller gets false until the claim is released.
    fn should_process(&self, call_id: &str) -> bool;
    /// Record that dispatch for a claimed `call_id` has finished.
    fn mark_processed(&self, call_id: &str);
    /// Drop an unfinished claim so a redelivery can try again.
    fn release(&self, call_id: &str);
    fn processed_count(&self) -> usize;
    fn evict_older_than(&self, ttl: Duration) -> usize;
}

pub trait AppointmentStore: Send + Sync {
    /// Store (or replace) the booking for `call_id`.
    fn put(&self, call_id: &str, datetime_raw: &str, datetime_display: &str);
    /// Remove and return the booking for `call_id`.
    fn take(&self, call_id: &str) -> Option<AppointmentRecord>;
    fn pending_count(&self) -> usize;
    fn evict_older_than(&self, ttl: Duration) -> usize;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic elsewhere cannot leave these maps half-updated, so keep serving.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ClaimState {
    InFlight,
    Done,
}

#[derive(Default)]
pub struct InMemoryIdempotency {
    calls: Mutex<HashMap<String, (ClaimState, Instant)>>,
}

impl InMemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryIdempotency {
    fn should_process(&self, call_id: &str) -> bool {
        let mut calls = lock(&self.calls);
        if calls.contains_key(call_id) {
            return false;
        }
        calls.insert(call_id.to_string(), (ClaimState::InFlight, Instant::now()));
        true
    }

    fn mark_processed(&self, call_id: &str) {
        lock(&self.calls).insert(call_id.to_string(), (ClaimState::Done, Instant::now()));
    }

    fn release(&self, call_id: &str) {
        let mut calls = lock(&self.calls);
        if let Some((ClaimState::InFlight, _)) = calls.get(call_id) {
            calls.remove(call_id);
        }
    }

    fn processed_count(&self) -> usize {
        lock(&self.calls)
            .values()
            .filter(|(state, _)| *state == ClaimState::Done)
            .count()
    }

    fn evict_older_than(&self, ttl: Duration) -> usize {
        let mut calls = lock(&self.calls);
        let before = calls.len();
        calls.retain(|_, (state, at)| *state == ClaimState::InFlight || at.elapsed() < ttl);
        before - calls.len()
    }
}

#[derive(Default)]
pub struct InMemoryAppointments {
    records: Mutex<HashMap<String, (AppointmentRecord, Instant)>>,
}

impl InMemoryAppointments {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppointmentStore for InMemoryAppointments {
    fn put(&self, call_id: &str, datetime_raw: &str, datetime_display: &str) {
        let record = AppointmentRecord {
            datetime_raw: datetime_raw.to_string(),
            datetime_display: datetime_display.to_string(),
        };
        lock(&self.records).insert(call_id.to_string(), (record, Instant::now()));
    }

    fn take(&self, call_id: &str) -> Option<AppointmentRecord> {
        lock(&self.records).remove(call_id).map(|(record, _)| record)
    }

    fn pending_count(&self) -> usize {
        lock(&self.records).len()
    }

    fn evict_older_than(&self, ttl: Duration) -> usize {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|_, (_, at)| at.elapsed() < ttl);
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_claim_wins_and_done_calls_stay_done() {
        let guard = InMemoryIdempotency::new();
        assert!(guard.should_process("call-1"));
        assert!(!guard.should_process("call-1"));
        guard.mark_processed("call-1");
        guard.release("call-1");
        assert!(!guard.should_process("call-1"));
        assert!(guard.should_process("call-2"));
        assert_eq!(guard.processed_count(), 1);
    }

    #[test]
    fn released_claim_can_be_retried() {
        let guard = InMemoryIdempotency::new();
        assert!(guard.should_process("call-1"));
        guard.release("call-1");
        assert!(guard.should_process("call-1"));
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let guard = Arc::new(InMemoryIdempotency::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                thread::spawn(move || guard.should_process("same-call"))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn eviction_skips_in_flight_claims() {
        let guard = InMemoryIdempotency::new();
        guard.should_process("busy");
        guard.should_process("done");
        guard.mark_processed("done");
        assert_eq!(guard.evict_older_than(Duration::ZERO), 1);
        assert!(!guard.should_process("busy"));
        assert!(guard.should_process("done"));
    }

    #[test]
    fn appointment_take_consumes_the_record() {
        let cache = InMemoryAppointments::new();
        cache.put("abc", "2025-03-01T14:00:00Z", "Saturday, March 1 at 6:00 AM");
        cache.put("abc", "2025-03-02T14:00:00Z", "Sunday, March 2 at 6:00 AM");
        assert_eq!(cache.pending_count(), 1);
        let record = cache.take("abc").unwrap();
        assert_eq!(record.datetime_raw, "2025-03-02T14:00:00Z");
        assert!(cache.take("abc").is_none());
    }

    #[test]
    fn appointment_eviction_drops_stale_records() {
        let cache = InMemoryAppointments::new();
        cache.put("abc", "2025-03-01T14:00:00Z", "x");
        assert_eq!(cache.evict_older_than(Duration::from_secs(3600)), 0);
        assert_eq!(cache.evict_older_than(Duration::ZERO), 1);
        assert_eq!(cache.pending_count(), 0);
    }
}
