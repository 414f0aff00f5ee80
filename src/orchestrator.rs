use crate::error::SinkError;
use crate::extract::Extractor;
use crate::sinks::Sink;
use crate::stores::{AppointmentStore, IdempotencyStore};
use crate::types::{AppointmentRecord, Lead, SinkKind, SinkOutcome};
use crate::vapi_types::{call_id, event_kind, unwrap_envelope, EventKind};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Where an inbound event goes after its kind has been read.
#[derive(PartialEq, Debug)]
pub enum Classified<'a> {
    Ignored(String),
    ToolCalls,
    EndOfCall(&'a Value),
}

pub fn classify(body: &Value) -> Classified<'_> {
    let event = unwrap_envelope(body);
    match event_kind(event) {
        EventKind::EndOfCall => Classified::EndOfCall(event),
        EventKind::ToolCalls => Classified::ToolCalls,
        EventKind::Other(kind) => Classified::Ignored(kind),
    }
}

#[derive(Debug)]
pub struct DispatchReport {
    pub lead: Lead,
    pub errors: Vec<String>,
}

impl DispatchReport {
    pub fn updated(&self, kind: SinkKind) -> bool {
        self.lead
            .sink_results
            .get(kind.as_str())
            .map(|o| o.ok)
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub enum LeadOutcome {
    Duplicate { call_id: String },
    Delivered(DispatchReport),
}

/// An in-flight idempotency claim.  Dropping it without `commit` hands the call id back and puts
/// any booking it consumed back in the cache, so a redelivery starts from the same state.
struct Claim<'a> {
    processed: &'a dyn IdempotencyStore,
    appointments: &'a dyn AppointmentStore,
    call_id: String,
    booked: Option<AppointmentRecord>,
    committed: bool,
}

impl Claim<'_> {
    fn commit(mut self) {
        self.processed.mark_processed(&self.call_id);
        self.committed = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        warn!(call_id=%self.call_id, "releasing unfinished claim");
        if let Some(record) = self.booked.take() {
            self.appointments
                .put(&self.call_id, &record.datetime_raw, &record.datetime_display);
        }
        self.processed.release(&self.call_id);
    }
}

pub struct Orchestrator {
    extractor: Extractor,
    sinks: Vec<Arc<dyn Sink>>,
    processed: Arc<dyn IdempotencyStore>,
    appointments: Arc<dyn AppointmentStore>,
    sink_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        extractor: Extractor,
        sinks: Vec<Arc<dyn Sink>>,
        processed: Arc<dyn IdempotencyStore>,
        appointments: Arc<dyn AppointmentStore>,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            sinks,
            processed,
            appointments,
            sink_timeout,
        }
    }

    pub fn sink_kinds(&self) -> Vec<SinkKind> {
        self.sinks.iter().map(|s| s.kind()).collect()
    }

    /// Run one end-of-call event through dedupe, extraction and dispatch.
    pub async fn process_end_of_call(&self, event: &Value) -> LeadOutcome {
        let call_id = call_id(event);

        let claim = match call_id {
            Some(id) if !self.processed.should_process(&id) => {
                info!(call_id=%id, "call already processed; skipping dispatch");
                return LeadOutcome::Duplicate { call_id: id };
            }
            Some(id) => Some(Claim {
                processed: self.processed.as_ref(),
                appointments: self.appointments.as_ref(),
                booked: self.appointments.take(&id),
                call_id: id,
                committed: false,
            }),
            None => {
                warn!("end-of-call event without a call id; cannot deduplicate");
                None
            }
        };

        let booked = claim.as_ref().and_then(|c| c.booked.clone());
        let lead = self.extractor.extract(event, booked);
        info!(
            call_id=%lead.call_id,
            name=%lead.full_name(),
            urgency=%lead.urgency,
            appointment=?lead.appointment_datetime,
            "lead extracted"
        );

        let report = self.dispatch(lead, None).await;
        if let Some(claim) = claim {
            claim.commit();
        }
        LeadOutcome::Delivered(report)
    }

    /// Deliver `lead` to every sink in order (or only to `only`).  Sink failures are recorded on
    /// the lead and collected as error strings; they never abort the loop.
    pub async fn dispatch(&self, mut lead: Lead, only: Option<SinkKind>) -> DispatchReport {
        let mut errors = Vec::new();

        for sink in &self.sinks {
            let kind = sink.kind();
            if only.map_or(false, |k| k != kind) {
                continue;
            }
            if let Some(reason) = sink.skip_reason(&lead) {
                info!(sink=%kind, call_id=%lead.call_id, reason, "sink skipped");
                lead.sink_results
                    .insert(kind.to_string(), SinkOutcome::skipped(reason));
                continue;
            }

            let result = match timeout(self.sink_timeout, sink.deliver(&lead)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(self.sink_timeout.as_secs())),
            };
            let outcome = match result {
                Ok(delivery) => {
                    info!(sink=%kind, call_id=%lead.call_id, detail=%delivery.detail, "sink delivered");
                    if kind == SinkKind::Crm {
                        lead.crm_contact_id = delivery.reference.clone();
                    }
                    SinkOutcome {
                        attempted: true,
                        ok: true,
                        detail: Some(delivery.detail),
                        error: None,
                    }
                }
                Err(e) => {
                    error!(sink=%kind, call_id=%lead.call_id, error=%e, "sink delivery failed");
                    errors.push(format!("{kind}: {e}"));
                    SinkOutcome {
                        attempted: true,
                        ok: false,
                        detail: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            lead.sink_results.insert(kind.to_string(), outcome);
        }

        DispatchReport { lead, errors }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::sinks::Delivery;
    use crate::stores::{InMemoryAppointments, InMemoryIdempotency};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    pub enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    /// Records every lead it is handed.
    pub struct RecordingSink {
        pub kind: SinkKind,
        pub behavior: Behavior,
        pub seen: Mutex<Vec<Lead>>,
    }

    impl RecordingSink {
        pub fn new(kind: SinkKind, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                behavior,
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn kind(&self) -> SinkKind {
            self.kind
        }

        fn skip_reason(&self, lead: &Lead) -> Option<&'static str> {
            (self.kind == SinkKind::Calendar && lead.appointment_datetime.is_none())
                .then_some("no appointment booked")
        }

        async fn deliver(&self, lead: &Lead) -> Result<Delivery, SinkError> {
            self.seen.lock().unwrap().push(lead.clone());
            match self.behavior {
                Behavior::Succeed => Ok(Delivery {
                    detail: format!("{} ok", self.kind),
                    reference: Some(format!("{}-ref", self.kind)),
                }),
                Behavior::Fail => Err(SinkError::Rejected("boom".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Delivery::new("never"))
                }
            }
        }
    }

    pub fn orchestrator_with(
        sinks: Vec<Arc<RecordingSink>>,
        appointments: Arc<InMemoryAppointments>,
    ) -> Orchestrator {
        Orchestrator::new(
            Extractor::new("Las Vegas"),
            sinks.into_iter().map(|s| s as Arc<dyn Sink>).collect(),
            Arc::new(InMemoryIdempotency::new()),
            appointments,
            Duration::from_millis(50),
        )
    }

    pub fn end_of_call(call_id: &str) -> Value {
        json!({"message": {
            "type": "end-of-call-report",
            "call": {"id": call_id, "customer": {"number": "(702) 555-1234"}},
            "analysis": {"structuredData": {"name": "Jane Doe", "damageType": "water"}}
        }})
    }

    fn unwrap_delivered(outcome: LeadOutcome) -> DispatchReport {
        match outcome {
            LeadOutcome::Delivered(report) => report,
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn classify_routes_by_kind() {
        let body = end_of_call("c1");
        assert!(matches!(classify(&body), Classified::EndOfCall(_)));
        assert_eq!(
            classify(&json!({"message": {"type": "tool-calls"}})),
            Classified::ToolCalls
        );
        assert_eq!(
            classify(&json!({"type": "status-update"})),
            Classified::Ignored("status-update".into())
        );
    }

    #[tokio::test]
    async fn repeated_report_dispatches_once() {
        let sheet = RecordingSink::new(SinkKind::Spreadsheet, Behavior::Succeed);
        let orch = orchestrator_with(vec![sheet.clone()], Default::default());
        let body = end_of_call("dup-1");
        let event = unwrap_envelope(&body);

        unwrap_delivered(orch.process_end_of_call(event).await);
        let second = orch.process_end_of_call(event).await;
        assert!(matches!(second, LeadOutcome::Duplicate { ref call_id } if call_id == "dup-1"));
        assert_eq!(sheet.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_reports_dispatch_once() {
        let sheet = RecordingSink::new(SinkKind::Spreadsheet, Behavior::Succeed);
        let orch = orchestrator_with(vec![sheet.clone()], Default::default());
        let body = end_of_call("race-1");
        let event = unwrap_envelope(&body);

        let (a, b) = tokio::join!(orch.process_end_of_call(event), orch.process_end_of_call(event));
        let delivered = [a, b]
            .into_iter()
            .filter(|o| matches!(o, LeadOutcome::Delivered(_)))
            .count();
        assert_eq!(delivered, 1);
        assert_eq!(sheet.calls(), 1);
    }

    #[tokio::test]
    async fn one_failing_sink_does_not_stop_the_rest() {
        let crm = RecordingSink::new(SinkKind::Crm, Behavior::Hang);
        let sheet = RecordingSink::new(SinkKind::Spreadsheet, Behavior::Succeed);
        let sms = RecordingSink::new(SinkKind::Sms, Behavior::Succeed);
        let orch = orchestrator_with(
            vec![crm.clone(), sheet.clone(), sms.clone()],
            Default::default(),
        );
        let body = end_of_call("partial-1");

        let report = unwrap_delivered(orch.process_end_of_call(unwrap_envelope(&body)).await);
        let results = &report.lead.sink_results;
        assert!(!results["crm"].ok);
        assert!(results["crm"].attempted);
        assert!(results["crm"].error.as_deref().unwrap().contains("timed out"));
        assert!(results["spreadsheet"].ok);
        assert!(results["sms"].ok);
        assert_eq!(report.errors.len(), 1);
        assert!(report.lead.crm_contact_id.is_none());
        assert_eq!(sheet.calls(), 1);
        assert_eq!(sms.calls(), 1);
    }

    #[tokio::test]
    async fn crm_id_reaches_later_sinks() {
        let crm = RecordingSink::new(SinkKind::Crm, Behavior::Succeed);
        let sms = RecordingSink::new(SinkKind::Sms, Behavior::Fail);
        let orch = orchestrator_with(vec![crm, sms.clone()], Default::default());
        let body = end_of_call("crm-1");

        let report = unwrap_delivered(orch.process_end_of_call(unwrap_envelope(&body)).await);
        assert_eq!(report.lead.crm_contact_id.as_deref(), Some("crm-ref"));
        let seen = sms.seen.lock().unwrap();
        assert_eq!(seen[0].crm_contact_id.as_deref(), Some("crm-ref"));
        assert!(report.updated(SinkKind::Crm));
        assert!(!report.updated(SinkKind::Sms));
        assert_eq!(report.errors, vec!["sms: boom".to_string()]);
    }

    #[tokio::test]
    async fn booked_appointment_is_merged_once_and_reaches_calendar() {
        let appointments = Arc::new(InMemoryAppointments::new());
        appointments.put("abc", "2025-03-01T14:00:00Z", "Saturday, March 1 at 6:00 AM");
        let calendar = RecordingSink::new(SinkKind::Calendar, Behavior::Succeed);
        let orch = orchestrator_with(vec![calendar.clone()], appointments.clone());
        let body = end_of_call("abc");

        let report = unwrap_delivered(orch.process_end_of_call(unwrap_envelope(&body)).await);
        assert_eq!(
            report.lead.appointment_datetime.as_deref(),
            Some("2025-03-01T14:00:00Z")
        );
        assert!(appointments.take("abc").is_none());
        assert!(report.updated(SinkKind::Calendar));
        assert_eq!(calendar.calls(), 1);
    }

    #[tokio::test]
    async fn abandoned_dispatch_gives_back_claim_and_booking() {
        let appointments = Arc::new(InMemoryAppointments::new());
        appointments.put("abc", "2025-03-01T14:00:00Z", "Saturday, March 1 at 6:00 AM");
        let crm = RecordingSink::new(SinkKind::Crm, Behavior::Hang);
        let calendar = RecordingSink::new(SinkKind::Calendar, Behavior::Succeed);
        let orch = orchestrator_with(vec![crm, calendar.clone()], appointments.clone());
        let body = end_of_call("abc");
        let event = unwrap_envelope(&body);

        let abandoned = timeout(Duration::from_millis(10), orch.process_end_of_call(event)).await;
        assert!(abandoned.is_err());
        assert_eq!(appointments.pending_count(), 1);

        let report = unwrap_delivered(orch.process_end_of_call(event).await);
        assert_eq!(
            report.lead.appointment_datetime.as_deref(),
            Some("2025-03-01T14:00:00Z")
        );
        assert!(report.updated(SinkKind::Calendar));
        assert_eq!(appointments.pending_count(), 0);
    }

    #[tokio::test]
    async fn calendar_is_skipped_without_an_appointment() {
        let calendar = RecordingSink::new(SinkKind::Calendar, Behavior::Succeed);
        let orch = orchestrator_with(vec![calendar.clone()], Default::default());
        let body = end_of_call("no-appt");

        let report = unwrap_delivered(orch.process_end_of_call(unwrap_envelope(&body)).await);
        let outcome = &report.lead.sink_results["calendar"];
        assert!(!outcome.attempted);
        assert!(report.errors.is_empty());
        assert_eq!(calendar.calls(), 0);
    }

    #[tokio::test]
    async fn dispatch_can_target_a_single_sink() {
        let crm = RecordingSink::new(SinkKind::Crm, Behavior::Succeed);
        let sms = RecordingSink::new(SinkKind::Sms, Behavior::Succeed);
        let orch = orchestrator_with(vec![crm.clone(), sms.clone()], Default::default());

        let report = orch.dispatch(Lead::default(), Some(SinkKind::Sms)).await;
        assert_eq!(crm.calls(), 0);
        assert_eq!(sms.calls(), 1);
        assert_eq!(report.lead.sink_results.len(), 1);
    }

    #[tokio::test]
    async fn events_without_call_id_still_dispatch() {
        let sheet = RecordingSink::new(SinkKind::Spreadsheet, Behavior::Succeed);
        let orch = orchestrator_with(vec![sheet.clone()], Default::default());
        let event = json!({"type": "end-of-call-report"});

        unwrap_delivered(orch.process_end_of_call(&event).await);
        unwrap_delivered(orch.process_end_of_call(&event).await);
        assert_eq!(sheet.calls(), 2);
    }
}
