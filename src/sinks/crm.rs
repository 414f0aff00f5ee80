use super::{Delivery, Sink};
use crate::config::AlbiwareConfig;
use crate::error::SinkError;
use crate::types::{Lead, SinkKind, Urgency};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Serialize, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AlbiwareContact {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub address1: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub referral_source: String,
    pub contact_type: &'static str,
    pub notes: String,
}

impl AlbiwareContact {
    pub fn from_lead(lead: &Lead) -> Self {
        let addr = &lead.address_components;
        let mut notes = Vec::new();
        if lead.urgency == Urgency::Emergency {
            notes.push("EMERGENCY".to_string());
        }
        if !lead.damage_type.is_empty() {
            notes.push(format!("Damage: {}", lead.damage_type));
        }
        if !lead.issue_summary.is_empty() {
            notes.push(format!("Summary: {}", lead.issue_summary));
        }
        if let Some(at) = &lead.appointment_datetime {
            notes.push(format!("Appointment: {at}"));
        }
        if let Some(url) = &lead.recording_url {
            notes.push(format!("Recording: {url}"));
        }
        notes.push(format!("Call ID: {}", lead.call_id));

        Self {
            first_name: lead.first_name.clone(),
            last_name: lead.last_name.clone(),
            phone_number: lead.phone_display().to_string(),
            address1: if addr.street.is_empty() {
                lead.address_raw.clone()
            } else {
                addr.street.clone()
            },
            city: addr.city.clone(),
            state: addr.region.clone(),
            zip_code: addr.postal_code.clone(),
            referral_source: lead.referral_source.clone(),
            contact_type: "Customer",
            notes: notes.join("\n"),
        }
    }
}

/// The id Albiware assigned, wherever this API version put it.
pub fn contact_id(body: &Value) -> Option<String> {
    ["/id", "/contactId", "/data/id", "/data/contactId"]
        .iter()
        .filter_map(|p| body.pointer(p))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

pub struct AlbiwareSink {
    http: reqwest::Client,
    config: AlbiwareConfig,
}

impl AlbiwareSink {
    pub fn new(http: reqwest::Client, config: AlbiwareConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl Sink for AlbiwareSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Crm
    }

    async fn deliver(&self, lead: &Lead) -> Result<Delivery, SinkError> {
        let contact = AlbiwareContact::from_lead(lead);
        debug!(contact=?contact, "creating albiware contact");
        let url = format!("{}/Contacts", self.config.base_url);
        let resp = self
            .http
            .post(url)
            .header("ApiKey", &self.config.api_key)
            .json(&contact)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            return Err(SinkError::status(status, &text));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| SinkError::Response(format!("not json ({e})")))?;
        let id = contact_id(&body)
            .ok_or_else(|| SinkError::Response("no contact id in response".into()))?;
        info!(contact_id=%id, "albiware contact created");

        Ok(Delivery {
            detail: format!("contact {id} created"),
            reference: Some(id),
        })
    }
}
