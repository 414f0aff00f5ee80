use super::{Delivery, Sink};
use crate::apps_script::AppsScriptClient;
use crate::error::SinkError;
use crate::types::{Lead, SinkKind};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use tracing::{info, warn};

/// One spreadsheet row.  Field names are the column keys the script maps onto the sheet.
#[derive(Serialize, PartialEq, Debug)]
pub struct SheetRow {
    pub timestamp: String,
    pub call_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub damage_type: String,
    pub urgency: String,
    pub referral_source: String,
    pub issue_summary: String,
    pub appointment: String,
    pub crm_contact_id: String,
    pub recording_url: String,
    pub call_duration_seconds: Option<u64>,
}

impl SheetRow {
    pub fn from_lead(lead: &Lead, timestamp: String) -> Self {
        let addr = &lead.address_components;
        Self {
            timestamp,
            call_id: lead.call_id.clone(),
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
            phone_number: lead.phone_display().to_string(),
            address: lead.address_raw.clone(),
            city: addr.city.clone(),
            state: addr.region.clone(),
            zip: addr.postal_code.clone(),
            damage_type: lead.damage_type.clone(),
            urgency: lead.urgency.to_string(),
            referral_source: lead.referral_source.clone(),
            issue_summary: lead.issue_summary.clone(),
            appointment: lead.appointment_datetime.clone().unwrap_or_default(),
            crm_contact_id: lead.crm_contact_id.clone().unwrap_or_default(),
            recording_url: lead.recording_url.clone().unwrap_or_default(),
            call_duration_seconds: lead.call_duration_seconds,
        }
    }
}

pub struct SheetsSink {
    script: AppsScriptClient,
    offset: UtcOffset,
}

impl SheetsSink {
    pub fn new(http: reqwest::Client, url: &str, offset: UtcOffset) -> Self {
        Self {
            script: AppsScriptClient::new(http, url),
            offset,
        }
    }

    /// Whether the sheet already has a row for this call.  The sheet outlives this process, so
    /// it keeps its own record of what was written.
    async fn already_logged(&self, call_id: &str) -> Result<bool, SinkError> {
        let body = self
            .script
            .get_json(&[("action", "exists"), ("call_id", call_id)])
            .await?;
        Ok(body.get("found").and_then(Value::as_bool).unwrap_or(false))
    }
}

#[async_trait]
impl Sink for SheetsSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Spreadsheet
    }

    async fn deliver(&self, lead: &Lead) -> Result<Delivery, SinkError> {
        if !lead.call_id.is_empty() {
            match self.already_logged(&lead.call_id).await {
                Ok(true) => {
                    info!(call_id=%lead.call_id, "call already in sheet; not appending");
                    return Ok(Delivery::new("already logged"));
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(call_id=%lead.call_id, error=%e, "sheet lookup failed; appending anyway");
                }
            }
        }

        let timestamp = OffsetDateTime::now_utc()
            .to_offset(self.offset)
            .format(&Rfc3339)
            .unwrap_or_default();
        let row = SheetRow::from_lead(lead, timestamp);
        let body = self.script.post_json(&row).await?;
        let detail = match body.get("row").and_then(Value::as_u64) {
            Some(n) => format!("appended row {n}"),
            None => "appended".to_string(),
        };
        info!(call_id=%lead.call_id, %detail, "lead logged to sheet");
        Ok(Delivery::new(detail))
    }
}
