//! Appointment slots: parsing what the assistant heard, showing it back in business-local time,
//! and talking to the calendar proxy.

use crate::apps_script::AppsScriptClient;
use crate::config::CalendarConfig;
use crate::error::SinkError;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Parse a requested slot.  Full RFC 3339 instants are taken as-is; naive local times are read
/// in the business offset.
pub fn parse_slot(raw: &str, offset: UtcOffset) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(at);
    }
    let naive = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]"),
    ];
    naive
        .iter()
        .find_map(|fmt| PrimitiveDateTime::parse(raw, *fmt).ok())
        .map(|at| at.assume_offset(offset))
}

/// `Saturday, March 1 at 6:00 AM`, in business-local time.
pub fn display_slot(at: OffsetDateTime, offset: UtcOffset) -> String {
    let fmt = format_description!(
        "[weekday], [month repr:long] [day padding:none] at [hour repr:12 padding:none]:[minute] [period]"
    );
    at.to_offset(offset)
        .format(fmt)
        .unwrap_or_else(|_| at.to_string())
}

/// RFC 3339 in business-local time, e.g. `2025-03-01T06:00:00-08:00`.
pub fn local_rfc3339(at: OffsetDateTime, offset: UtcOffset) -> String {
    at.to_offset(offset)
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.to_string())
}

#[async_trait]
pub trait AvailabilityLookup: Send + Sync {
    async fn is_free(&self, start: OffsetDateTime, end: OffsetDateTime) -> Result<bool, SinkError>;
}

#[derive(Serialize, Debug)]
pub struct CalendarEvent {
    pub action: &'static str,
    pub calendar_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start: String,
    pub end: String,
    pub time_zone: String,
}

#[derive(Serialize, Debug)]
struct AvailabilityQuery<'a> {
    action: &'static str,
    calendar_id: &'a str,
    start: String,
    end: String,
}

pub struct CalendarClient {
    script: AppsScriptClient,
    pub calendar_id: String,
    pub time_zone: String,
    pub offset: UtcOffset,
    pub duration: time::Duration,
}

impl CalendarClient {
    pub fn new(
        http: reqwest::Client,
        config: &CalendarConfig,
        time_zone: &str,
        offset: UtcOffset,
        duration: time::Duration,
    ) -> Self {
        Self {
            script: AppsScriptClient::new(http, &config.script_url),
            calendar_id: config.calendar_id.clone(),
            time_zone: time_zone.to_string(),
            offset,
            duration,
        }
    }

    /// Returns the id of the created event.
    pub async fn create_event(&self, event: &CalendarEvent) -> Result<String, SinkError> {
        let body = self.script.post_json(event).await?;
        match body.get("event_id").or_else(|| body.get("eventId")) {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            _ => Err(SinkError::Response("no event_id in calendar response".into())),
        }
    }
}

#[async_trait]
impl AvailabilityLookup for CalendarClient {
    async fn is_free(&self, start: OffsetDateTime, end: OffsetDateTime) -> Result<bool, SinkError> {
        let query = AvailabilityQuery {
            action: "check_availability",
            calendar_id: &self.calendar_id,
            start: local_rfc3339(start, self.offset),
            end: local_rfc3339(end, self.offset),
        };
        let body = self.script.post_json(&query).await?;
        body.get("available")
            .and_then(Value::as_bool)
            .ok_or_else(|| SinkError::Response("no 'available' flag in calendar response".into()))
    }
}
