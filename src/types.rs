use crate::calendar::AvailabilityLookup;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::stores::{AppointmentStore, IdempotencyStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Standard,
    Emergency,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Urgency::Standard => write!(f, "standard"),
            Urgency::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, Debug)]
pub struct AddressComponents {
    pub street: String,
    pub city: String,
    pub region: String,
    pub postal_code: String,
}

/// Canonical record of one completed call.  Built once by the extractor; afterwards only the
/// orchestrator touches `crm_contact_id` and `sink_results` while dispatching.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Debug)]
#[serde(default)]
pub struct Lead {
    pub call_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(alias = "phone_number", alias = "phone")]
    pub phone_raw: String,
    pub phone_e164: Option<String>,
    #[serde(alias = "address")]
    pub address_raw: String,
    pub address_components: AddressComponents,
    pub damage_type: String,
    pub issue_summary: String,
    pub urgency: Urgency,
    pub referral_source: String,
    pub appointment_datetime: Option<String>,
    pub recording_url: Option<String>,
    pub call_duration_seconds: Option<u64>,
    pub raw_transcript: Option<String>,
    pub crm_contact_id: Option<String>,
    pub sink_results: BTreeMap<String, SinkOutcome>,
}

impl Lead {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Best phone for humans: the normalized form when we have one, else whatever was said.
    pub fn phone_display(&self) -> &str {
        self.phone_e164.as_deref().unwrap_or(&self.phone_raw)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Crm,
    Spreadsheet,
    Sms,
    Calendar,
}

impl SinkKind {
    /// Default dispatch order; the CRM goes first so later sinks can quote its contact id.
    pub const ALL: [SinkKind; 4] = [
        SinkKind::Crm,
        SinkKind::Spreadsheet,
        SinkKind::Sms,
        SinkKind::Calendar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Crm => "crm",
            SinkKind::Spreadsheet => "spreadsheet",
            SinkKind::Sms => "sms",
            SinkKind::Calendar => "calendar",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crm" | "albiware" => Ok(SinkKind::Crm),
            "spreadsheet" | "sheets" | "sheet" => Ok(SinkKind::Spreadsheet),
            "sms" => Ok(SinkKind::Sms),
            "calendar" => Ok(SinkKind::Calendar),
            other => Err(format!("unknown sink '{other}'")),
        }
    }
}

/// What happened to one sink during one request.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq, Eq, Debug)]
pub struct SinkOutcome {
    pub attempted: bool,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SinkOutcome {
    pub fn skipped(reason: &str) -> Self {
        Self {
            attempted: false,
            ok: false,
            detail: Some(reason.to_string()),
            error: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AppointmentRecord {
    pub datetime_raw: String,
    pub datetime_display: String,
}

pub struct AppState {
    pub config: Config,
    pub orchestrator: Orchestrator,
    pub appointments: Arc<dyn AppointmentStore>,
    pub processed: Arc<dyn IdempotencyStore>,
    pub availability: Option<Arc<dyn AvailabilityLookup>>,
}
