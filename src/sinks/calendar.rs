use super::{Delivery, Sink};
use crate::calendar::{local_rfc3339, parse_slot, CalendarClient, CalendarEvent};
use crate::error::SinkError;
use crate::types::{Lead, SinkKind, Urgency};

use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

pub struct CalendarSink {
    client: Arc<CalendarClient>,
}

impl CalendarSink {
    pub fn new(client: Arc<CalendarClient>) -> Self {
        Self { client }
    }

    pub fn event_for(&self, lead: &Lead, start: OffsetDateTime) -> CalendarEvent {
        let client = &self.client;
        let name = lead.full_name();
        let mut title = format!(
            "Inspection - {}",
            if name.is_empty() { "New Customer" } else { name.as_str() }
        );
        if lead.urgency == Urgency::Emergency {
            title.insert_str(0, "EMERGENCY ");
        }

        let mut description = vec![
            format!("Phone: {}", lead.phone_display()),
            format!("Issue: {}", lead.issue_summary),
            format!("Urgency: {}", lead.urgency),
        ];
        if !lead.damage_type.is_empty() {
            description.push(format!("Damage: {}", lead.damage_type));
        }
        if let Some(id) = &lead.crm_contact_id {
            description.push(format!("CRM ID: {id}"));
        }
        description.push(format!("Call ID: {}", lead.call_id));

        CalendarEvent {
            action: "create_event",
            calendar_id: client.calendar_id.clone(),
            title,
            description: description.join("\n"),
            location: lead.address_raw.clone(),
            start: local_rfc3339(start, client.offset),
            end: local_rfc3339(start + client.duration, client.offset),
            time_zone: client.time_zone.clone(),
        }
    }
}

#[async_trait]
impl Sink for CalendarSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Calendar
    }

    fn skip_reason(&self, lead: &Lead) -> Option<&'static str> {
        lead.appointment_datetime
            .is_none()
            .then_some("no appointment booked")
    }

    async fn deliver(&self, lead: &Lead) -> Result<Delivery, SinkError> {
        let raw = lead
            .appointment_datetime
            .as_deref()
            .ok_or_else(|| SinkError::Rejected("no appointment booked".into()))?;
        let start = parse_slot(raw, self.client.offset)
            .ok_or_else(|| SinkError::Rejected(format!("unreadable appointment time '{raw}'")))?;

        let event = self.event_for(lead, start);
        let event_id = self.client.create_event(&event).await?;
        info!(call_id=%lead.call_id, event_id=%event_id, start=%event.start, "calendar event created");

        Ok(Delivery {
            detail: format!("event {event_id} at {}", event.start),
            reference: Some(event_id),
        })
    }
}
