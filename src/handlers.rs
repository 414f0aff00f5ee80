use crate::address::parse_address;
use crate::consts::SERVICE_NAME;
use crate::error::AppError;
use crate::orchestrator::{classify, Classified, DispatchReport, LeadOutcome};
use crate::phone::to_e164;
use crate::tools::{handle_tool_calls, ToolKind};
use crate::types::{AppState, Lead, SinkKind};
use crate::vapi_types::ToolCallResponse;

use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Empty bodies are `None`; anything else must be JSON.
fn parse_body(body: &Bytes) -> Result<Option<Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::BadRequest(format!("body is not valid JSON: {e}")))
}

fn lead_response(report: DispatchReport, message: &str) -> Result<Value, AppError> {
    let mut response = Map::new();
    response.insert("status".into(), json!("success"));
    response.insert("message".into(), json!(message));
    response.insert("call_id".into(), json!(report.lead.call_id));
    for kind in SinkKind::ALL {
        response.insert(format!("{kind}_updated"), json!(report.updated(kind)));
    }
    response.insert(
        "sink_results".into(),
        serde_json::to_value(&report.lead.sink_results)
            .map_err(|e| AppError::Internal(e.to_string()))?,
    );
    response.insert("errors".into(), json!(report.errors));
    response.insert(
        "data".into(),
        serde_json::to_value(&report.lead).map_err(|e| AppError::Internal(e.to_string()))?,
    );
    Ok(Value::Object(response))
}

pub async fn health(State(app_state): State<Arc<AppState>>) -> Json<Value> {
    let config = &app_state.config;
    let mut report = Map::new();
    report.insert("status".into(), json!("healthy"));
    report.insert("service".into(), json!(SERVICE_NAME));
    report.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
    report.insert(
        "timestamp".into(),
        json!(OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()),
    );
    for kind in SinkKind::ALL {
        report.insert(format!("{kind}_configured"), json!(config.is_configured(kind)));
    }
    report.insert(
        "enabled_sinks".into(),
        json!(app_state.orchestrator.sink_kinds()),
    );
    report.insert(
        "processed_calls".into(),
        json!(app_state.processed.processed_count()),
    );
    report.insert(
        "pending_appointments".into(),
        json!(app_state.appointments.pending_count()),
    );
    Json(Value::Object(report))
}

/// Single entry point for every event the voice platform posts.
#[tracing::instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
pub async fn webhook(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let body = match parse_body(&body)? {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
        _ => return Err(AppError::BadRequest("No payload received".into())),
    };

    match classify(&body) {
        Classified::Ignored(kind) => {
            debug!(event_type=%kind, "event acknowledged without processing");
            Ok(Json(json!({
                "status": "received",
                "message": format!("Event type {kind} acknowledged"),
            })))
        }
        Classified::ToolCalls => {
            let response = handle_tool_calls(&app_state, &body, None).await;
            let value =
                serde_json::to_value(response).map_err(|e| AppError::Internal(e.to_string()))?;
            Ok(Json(value))
        }
        Classified::EndOfCall(event) => match app_state.orchestrator.process_end_of_call(event).await
        {
            LeadOutcome::Duplicate { call_id } => Ok(Json(json!({
                "status": "success",
                "message": "Call already processed",
                "call_id": call_id,
                "duplicate": true,
            }))),
            LeadOutcome::Delivered(report) => {
                info!(
                    call_id=%report.lead.call_id,
                    errors=report.errors.len(),
                    "lead processed"
                );
                lead_response(report, "Lead processed").map(Json)
            }
        },
    }
}

async fn tool_route(app_state: &AppState, body: &Bytes, kind: ToolKind) -> Json<ToolCallResponse> {
    let body = match parse_body(body) {
        Ok(Some(body)) => body,
        Ok(None) => Value::Null,
        Err(e) => {
            warn!(tool=?kind, error=%e, "unreadable tool request");
            Value::Null
        }
    };
    Json(handle_tool_calls(app_state, &body, Some(kind)).await)
}

pub async fn check_availability(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<ToolCallResponse> {
    tool_route(&app_state, &body, ToolKind::CheckAvailability).await
}

pub async fn book_appointment(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<ToolCallResponse> {
    tool_route(&app_state, &body, ToolKind::BookAppointment).await
}

pub async fn cancel_appointment(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<ToolCallResponse> {
    tool_route(&app_state, &body, ToolKind::CancelAppointment).await
}

pub async fn reschedule_appointment(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<ToolCallResponse> {
    tool_route(&app_state, &body, ToolKind::RescheduleAppointment).await
}

fn sample_lead() -> Lead {
    Lead {
        first_name: "Test".into(),
        last_name: "User".into(),
        phone_raw: "555-0000".into(),
        address_raw: "123 Test St".into(),
        referral_source: "Manual Test".into(),
        issue_summary: "Testing webhook integration".into(),
        ..Lead::default()
    }
}

/// Lead for a manual run: the posted one, or a canned one.  Derived fields are always
/// recomputed and the call id is always fresh.
fn test_lead(app_state: &AppState, body: Option<Value>) -> Result<Lead, AppError> {
    let mut lead = match body {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| AppError::BadRequest(format!("not a lead: {e}")))?,
        None => sample_lead(),
    };
    lead.call_id = format!("test-{}", Uuid::new_v4());
    lead.phone_e164 = to_e164(&lead.phone_raw);
    lead.address_components = parse_address(&lead.address_raw, &app_state.config.default_city);
    lead.crm_contact_id = None;
    lead.sink_results.clear();
    Ok(lead)
}

async fn run_test(
    app_state: &AppState,
    body: &Bytes,
    only: Option<SinkKind>,
) -> Result<Json<Value>, AppError> {
    let lead = test_lead(app_state, parse_body(body)?)?;
    info!(call_id=%lead.call_id, sink=?only, "manual test dispatch");
    let report = app_state.orchestrator.dispatch(lead, only).await;
    lead_response(report, "Test lead dispatched").map(Json)
}

pub async fn test_all(
    State(app_state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    run_test(&app_state, &body, None).await
}

pub async fn test_sink(
    State(app_state): State<Arc<AppState>>,
    Path(sink): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let kind = sink.parse::<SinkKind>().map_err(AppError::BadRequest)?;
    run_test(&app_state, &body, Some(kind)).await
}
