//! Mid-call tool invocations.  Whatever happens in here, the assistant gets a sentence it can
//! read to the caller; internal failures are logged and turned into a hand-off line.

use crate::calendar::{display_slot, parse_slot};
use crate::error::SinkError;
use crate::types::AppState;
use crate::vapi_types::{ToolCall, ToolCallMessage, ToolCallResponse, ToolCallResult};

use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info};

pub const HANDOFF_MESSAGE: &str = "I'm sorry, I'm having trouble with our scheduling system \
     right now. A member of our team will call you back shortly to confirm a time.";
const UNCLEAR_TIME_MESSAGE: &str =
    "I didn't quite catch the date and time. Could you tell me the day and time that works best?";

const DATETIME_KEYS: &[&str] = &[
    "datetime",
    "dateTime",
    "date_time",
    "appointment_datetime",
    "appointmentDateTime",
    "requested_time",
    "new_datetime",
    "newDateTime",
    "time",
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ToolKind {
    CheckAvailability,
    BookAppointment,
    CancelAppointment,
    RescheduleAppointment,
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "checkavailability" => Ok(ToolKind::CheckAvailability),
            "bookappointment" => Ok(ToolKind::BookAppointment),
            "cancelappointment" => Ok(ToolKind::CancelAppointment),
            "rescheduleappointment" => Ok(ToolKind::RescheduleAppointment),
            _ => Err(format!("unknown tool '{s}'")),
        }
    }
}

#[derive(Debug, Error)]
enum ToolError {
    #[error("{0}")]
    UnknownTool(String),
    #[error("tool call has no call id")]
    MissingCallId,
    #[error("calendar is not configured")]
    CalendarUnavailable,
    #[error("calendar lookup failed: {0}")]
    Calendar(#[from] SinkError),
}

/// The requested slot as the assistant sent it, plus its parsed instant.
fn requested_slot<'a>(
    state: &AppState,
    args: &'a Map<String, Value>,
) -> Option<(&'a str, OffsetDateTime)> {
    let raw = DATETIME_KEYS
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    Some((raw, parse_slot(raw, state.config.business_offset)?))
}

/// Answer every tool call in the request.  `forced` pins the handler when the route already
/// says which tool this is; otherwise each call is routed by its function name.
pub async fn handle_tool_calls(
    state: &AppState,
    body: &Value,
    forced: Option<ToolKind>,
) -> ToolCallResponse {
    let message = ToolCallMessage::from_body(body);
    let call_id = message.call.id.clone().filter(|id| !id.is_empty());

    let mut results = Vec::with_capacity(message.tool_call_list.len());
    for tool_call in &message.tool_call_list {
        let result = match run_tool(state, call_id.as_deref(), tool_call, forced).await {
            Ok(text) => text,
            Err(e) => {
                error!(
                    tool=%tool_call.function.name,
                    tool_call_id=%tool_call.id,
                    call_id=?call_id,
                    error=%e,
                    "tool call failed"
                );
                HANDOFF_MESSAGE.to_string()
            }
        };
        results.push(ToolCallResult {
            tool_call_id: tool_call.id.clone(),
            result,
        });
    }
    ToolCallResponse { results }
}

async fn run_tool(
    state: &AppState,
    call_id: Option<&str>,
    tool_call: &ToolCall,
    forced: Option<ToolKind>,
) -> Result<String, ToolError> {
    let kind = match forced {
        Some(kind) => kind,
        None => tool_call
            .function
            .name
            .parse::<ToolKind>()
            .map_err(ToolError::UnknownTool)?,
    };
    let args = tool_call.function.argument_map();
    info!(tool=?kind, call_id=?call_id, args=?args, "tool call");

    match kind {
        ToolKind::CheckAvailability => check_availability(state, &args).await,
        ToolKind::CancelAppointment => {
            Ok(cancel_appointment(state, call_id.ok_or(ToolError::MissingCallId)?))
        }
        ToolKind::BookAppointment | ToolKind::RescheduleAppointment => {
            let call_id = call_id.ok_or(ToolError::MissingCallId)?;
            Ok(hold_appointment(state, call_id, &args, kind))
        }
    }
}

async fn check_availability(
    state: &AppState,
    args: &Map<String, Value>,
) -> Result<String, ToolError> {
    let Some((_, start)) = requested_slot(state, args) else {
        return Ok(UNCLEAR_TIME_MESSAGE.to_string());
    };
    let lookup = state
        .availability
        .as_ref()
        .ok_or(ToolError::CalendarUnavailable)?;

    let when = display_slot(start, state.config.business_offset);
    if lookup.is_free(start, start + state.config.appointment_duration).await? {
        Ok(format!("Good news, {when} is available. Would you like me to book it?"))
    } else {
        Ok(format!(
            "I'm sorry, {when} is already taken. Is there another day or time that works for you?"
        ))
    }
}

/// Book or reschedule: either way the call ends up holding exactly the requested slot.
fn hold_appointment(
    state: &AppState,
    call_id: &str,
    args: &Map<String, Value>,
    kind: ToolKind,
) -> String {
    let Some((raw, at)) = requested_slot(state, args) else {
        return UNCLEAR_TIME_MESSAGE.to_string();
    };
    let when = display_slot(at, state.config.business_offset);
    let previous = state.appointments.take(call_id);
    state.appointments.put(call_id, raw, &when);
    info!(call_id, appointment=%raw, tool=?kind, had_previous=previous.is_some(), "appointment held");

    match (kind, previous) {
        (ToolKind::RescheduleAppointment, Some(old)) => format!(
            "No problem. I've moved your appointment from {} to {when}.",
            old.datetime_display
        ),
        (ToolKind::RescheduleAppointment, None) => {
            format!("No problem. You're now scheduled for {when}.")
        }
        _ => format!(
            "You're all set for {when}. Our team will see you then, and you'll get a confirmation shortly."
        ),
    }
}

fn cancel_appointment(state: &AppState, call_id: &str) -> String {
    match state.appointments.take(call_id) {
        Some(record) => {
            info!(call_id, appointment=%record.datetime_raw, "appointment cancelled");
            format!(
                "Okay, I've cancelled your appointment for {}.",
                record.datetime_display
            )
        }
        None => "I don't see an appointment booked on this call, so there's nothing to cancel."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::AvailabilityLookup;
    use crate::config::Config;
    use crate::extract::Extractor;
    use crate::orchestrator::Orchestrator;
    use crate::stores::{InMemoryAppointments, InMemoryIdempotency};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedAvailability(Result<bool, &'static str>);

    #[async_trait]
    impl AvailabilityLookup for FixedAvailability {
        async fn is_free(&self, _: OffsetDateTime, _: OffsetDateTime) -> Result<bool, SinkError> {
            self.0.map_err(|e| SinkError::Rejected(e.to_string()))
        }
    }

    fn state(availability: Option<Arc<dyn AvailabilityLookup>>) -> AppState {
        let processed = Arc::new(InMemoryIdempotency::new());
        let appointments = Arc::new(InMemoryAppointments::new());
        AppState {
            config: Config::default(),
            orchestrator: Orchestrator::new(
                Extractor::new("Las Vegas"),
                vec![],
                processed.clone(),
                appointments.clone(),
                Duration::from_secs(1),
            ),
            appointments,
            processed,
            availability,
        }
    }

    fn tool_body(call_id: &str, name: &str, args: Value) -> Value {
        json!({"message": {
            "type": "tool-calls",
            "call": {"id": call_id},
            "toolCallList": [{"id": "tc-1", "function": {"name": name, "arguments": args}}]
        }})
    }

    #[test]
    fn tool_names_parse_in_any_case_style() {
        assert_eq!("book_appointment".parse::<ToolKind>(), Ok(ToolKind::BookAppointment));
        assert_eq!("checkAvailability".parse::<ToolKind>(), Ok(ToolKind::CheckAvailability));
        assert_eq!(
            "Reschedule-Appointment".parse::<ToolKind>(),
            Ok(ToolKind::RescheduleAppointment)
        );
        assert!("order_pizza".parse::<ToolKind>().is_err());
    }

    #[tokio::test]
    async fn booking_is_held_until_the_report_takes_it() {
        let state = state(None);
        let args = json!({"datetime": "2025-03-01T14:00:00Z"});
        let body = tool_body("abc", "book_appointment", args);
        let response = handle_tool_calls(&state, &body, None).await;
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].tool_call_id, "tc-1");
        assert!(response.results[0]
            .result
            .contains("Saturday, March 1 at 6:00 AM"));

        let record = state.appointments.take("abc").unwrap();
        assert_eq!(record.datetime_raw, "2025-03-01T14:00:00Z");
        assert_eq!(record.datetime_display, "Saturday, March 1 at 6:00 AM");
    }

    #[tokio::test]
    async fn unreadable_time_or_missing_call_id_stores_nothing() {
        let state = state(None);
        let body = tool_body("abc", "book_appointment", json!({"datetime": "sometime soon"}));
        let response = handle_tool_calls(&state, &body, None).await;
        assert_eq!(response.results[0].result, UNCLEAR_TIME_MESSAGE);

        let body = tool_body("", "book_appointment", json!({"datetime": "2025-03-01T14:00:00Z"}));
        let response = handle_tool_calls(&state, &body, None).await;
        assert_eq!(response.results[0].result, HANDOFF_MESSAGE);
        assert_eq!(state.appointments.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_and_reschedule_update_the_hold() {
        let state = state(None);
        state
            .appointments
            .put("abc", "2025-03-01T14:00:00Z", "Saturday, March 1 at 6:00 AM");

        let args = json!({"newDateTime": "2025-03-02 09:30"});
        let body = tool_body("abc", "reschedule_appointment", args);
        let response = handle_tool_calls(&state, &body, None).await;
        assert!(response.results[0]
            .result
            .contains("from Saturday, March 1 at 6:00 AM to Sunday, March 2 at 9:30 AM"));

        let body = tool_body("abc", "cancel_appointment", json!({}));
        let response = handle_tool_calls(&state, &body, None).await;
        assert!(response.results[0].result.contains("cancelled"));
        assert_eq!(state.appointments.pending_count(), 0);

        let response = handle_tool_calls(&state, &body, None).await;
        assert!(response.results[0].result.contains("nothing to cancel"));
    }

    #[tokio::test]
    async fn availability_answers_from_the_calendar() {
        let args = json!({"datetime": "2025-03-01T14:00:00Z"});
        let body = tool_body("abc", "check_availability", args);

        let free = state(Some(Arc::new(FixedAvailability(Ok(true)))));
        let response = handle_tool_calls(&free, &body, None).await;
        assert!(response.results[0].result.contains("is available"));

        let busy = state(Some(Arc::new(FixedAvailability(Ok(false)))));
        let response = handle_tool_calls(&busy, &body, None).await;
        assert!(response.results[0].result.contains("already taken"));

        let broken = state(Some(Arc::new(FixedAvailability(Err("script down")))));
        let response = handle_tool_calls(&broken, &body, None).await;
        assert_eq!(response.results[0].result, HANDOFF_MESSAGE);

        let unconfigured = state(None);
        let response = handle_tool_calls(&unconfigured, &body, None).await;
        assert_eq!(response.results[0].result, HANDOFF_MESSAGE);
    }

    #[tokio::test]
    async fn route_pins_the_tool_and_unknown_names_hand_off() {
        let state = state(None);
        let args = json!({"datetime": "2025-03-01T14:00:00Z"});
        let body = tool_body("abc", "whatever", args);
        let response = handle_tool_calls(&state, &body, Some(ToolKind::BookAppointment)).await;
        assert!(response.results[0].result.contains("all set"));

        let response = handle_tool_calls(&state, &body, None).await;
        assert_eq!(response.results[0].result, HANDOFF_MESSAGE);
    }
}
