//! Turns an end-of-call event into a [`Lead`].
//!
//! Producers have shipped several payload shapes over time.  Each shape is one
//! [`ExtractionStrategy`]; the extractor runs them in order and keeps, per field, the first
//! value any of them found.  Nothing in here fails: missing or odd data just leaves a field empty.

use crate::address::parse_address;
use crate::consts::{MAX_SUMMARY_CHARS, MAX_TRANSCRIPT_CHARS};
use crate::phone::to_e164;
use crate::types::{AppointmentRecord, Lead};
use crate::urgency::classify_urgency;
use crate::vapi_types::call_id;

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::trace;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Field {
    FirstName,
    LastName,
    FullName,
    Phone,
    Address,
    DamageType,
    Urgency,
    ReferralSource,
    Summary,
    Appointment,
}

/// Known spellings per field, compared after lowercasing and dropping `_`, `-` and spaces.
const VOCABULARY: &[(Field, &[&str])] = &[
    (Field::FirstName, &["customerfirstname", "firstname"]),
    (Field::LastName, &["customerlastname", "lastname"]),
    (
        Field::FullName,
        &["customername", "customerfullname", "fullname", "name"],
    ),
    (
        Field::Phone,
        &["phonenumber", "phone", "customerphone", "customerphonenumber", "callbacknumber"],
    ),
    (
        Field::Address,
        &["propertyaddress", "address", "serviceaddress", "customeraddress"],
    ),
    (Field::DamageType, &["damagetype", "issuetype", "servicetype"]),
    (Field::Urgency, &["urgencylevel", "urgency"]),
    (Field::ReferralSource, &["referralsource", "referral", "leadsource"]),
    (Field::Summary, &["callsummary", "issuesummary", "summary"]),
    (
        Field::Appointment,
        &["appointmentdatetime", "appointmenttime", "appointment"],
    ),
];

pub fn field_for(key: &str) -> Option<Field> {
    let key: String = key
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect();
    VOCABULARY
        .iter()
        .find(|(_, names)| names.contains(&key.as_str()))
        .map(|(field, _)| *field)
}

/// A scalar as trimmed text; empty strings, nulls, objects and arrays are "absent".
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_str(event: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| event.pointer(p))
        .find_map(scalar)
}

/// Raw field values found by one strategy.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct LeadFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub damage_type: Option<String>,
    pub urgency: Option<String>,
    pub referral_source: Option<String>,
    pub summary: Option<String>,
    pub appointment: Option<String>,
}

impl LeadFields {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::FirstName => &mut self.first_name,
            Field::LastName => &mut self.last_name,
            Field::FullName => &mut self.full_name,
            Field::Phone => &mut self.phone,
            Field::Address => &mut self.address,
            Field::DamageType => &mut self.damage_type,
            Field::Urgency => &mut self.urgency,
            Field::ReferralSource => &mut self.referral_source,
            Field::Summary => &mut self.summary,
            Field::Appointment => &mut self.appointment,
        }
    }

    /// Set `field` unless something already claimed it.
    pub fn offer(&mut self, field: Field, value: Option<String>) {
        let slot = self.slot(field);
        if slot.is_none() {
            *slot = value;
        }
    }

    fn offer_map(&mut self, map: &Map<String, Value>) {
        for (key, value) in map {
            if let Some(field) = field_for(key) {
                self.offer(field, scalar(value));
            }
        }
    }

    /// Fill every still-empty field from `other`.
    pub fn merge(&mut self, other: LeadFields) {
        self.offer(Field::FirstName, other.first_name);
        self.offer(Field::LastName, other.last_name);
        self.offer(Field::FullName, other.full_name);
        self.offer(Field::Phone, other.phone);
        self.offer(Field::Address, other.address);
        self.offer(Field::DamageType, other.damage_type);
        self.offer(Field::Urgency, other.urgency);
        self.offer(Field::ReferralSource, other.referral_source);
        self.offer(Field::Summary, other.summary);
        self.offer(Field::Appointment, other.appointment);
    }
}

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, event: &Value) -> LeadFields;
}

/// Entries of the `structuredOutputs` mapping as `(name, result)` pairs.  The mapping is keyed
/// by opaque ids, so only the entry's own `name` says what it holds.
fn structured_outputs(event: &Value) -> Vec<(&str, &Value)> {
    let container = [
        "/artifact/structuredOutputs",
        "/analysis/structuredOutputs",
        "/structuredOutputs",
    ]
    .iter()
    .find_map(|p| event.pointer(p));

    let entries: Vec<&Value> = match container {
        Some(Value::Object(map)) => map.values().collect(),
        Some(Value::Array(list)) => list.iter().collect(),
        _ => return Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry.get("name").and_then(Value::as_str)?;
            let result = entry.get("result")?;
            Some((name, result))
        })
        .collect()
}

/// One output per field, matched by name: `{"<id>": {"name": "phone_number", "result": "..."}}`.
pub struct StructuredOutputs;

impl ExtractionStrategy for StructuredOutputs {
    fn name(&self) -> &'static str {
        "structured_outputs"
    }

    fn extract(&self, event: &Value) -> LeadFields {
        let mut fields = LeadFields::default();
        for (name, result) in structured_outputs(event) {
            if let Some(field) = field_for(name) {
                fields.offer(field, scalar(result));
            }
        }
        fields
    }
}

/// A single output whose result is an object holding several fields at once.
pub struct CompositeOutput;

impl ExtractionStrategy for CompositeOutput {
    fn name(&self) -> &'static str {
        "composite_output"
    }

    fn extract(&self, event: &Value) -> LeadFields {
        let mut fields = LeadFields::default();
        for (_, result) in structured_outputs(event) {
            if let Value::Object(map) = result {
                fields.offer_map(map);
            }
        }
        fields
    }
}

/// The oldest shape: `analysis.structuredData` with named keys, plus `analysis.summary`.
pub struct FlatAnalysis;

impl ExtractionStrategy for FlatAnalysis {
    fn name(&self) -> &'static str {
        "flat_analysis"
    }

    fn extract(&self, event: &Value) -> LeadFields {
        let mut fields = LeadFields::default();
        if let Some(Value::Object(map)) = event.pointer("/analysis/structuredData") {
            fields.offer_map(map);
        }
        fields.offer(Field::Summary, first_str(event, &["/analysis/summary"]));
        fields
    }
}

pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    default_city: String,
}

impl Extractor {
    pub fn new(default_city: &str) -> Self {
        Self::with_strategies(
            default_city,
            vec![
                Box::new(StructuredOutputs),
                Box::new(CompositeOutput),
                Box::new(FlatAnalysis),
            ],
        )
    }

    pub fn with_strategies(
        default_city: &str,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        Self {
            strategies,
            default_city: default_city.to_string(),
        }
    }

    pub fn fields(&self, event: &Value) -> LeadFields {
        let mut fields = LeadFields::default();
        for strategy in &self.strategies {
            let found = strategy.extract(event);
            if found != LeadFields::default() {
                trace!(strategy = strategy.name(), fields = ?found, "extraction strategy matched");
            }
            fields.merge(found);
        }
        fields
    }

    /// Build the lead for an unwrapped end-of-call event.  A cached booking beats any
    /// appointment time found in the payload.
    pub fn extract(&self, event: &Value, booked: Option<AppointmentRecord>) -> Lead {
        let fields = self.fields(event);
        let transcript =
            first_str(event, &["/transcript", "/artifact/transcript"]).unwrap_or_default();

        let mut first_name = fields.first_name.unwrap_or_default();
        let mut last_name = fields.last_name.unwrap_or_default();
        if first_name.is_empty() {
            let combined = fields
                .full_name
                .or_else(|| first_str(event, &["/call/customer/name", "/customer/name"]))
                .unwrap_or_default();
            let (first, rest) = split_name(&combined);
            first_name = first;
            if last_name.is_empty() {
                last_name = rest;
            }
        }

        let phone_raw = fields
            .phone
            .or_else(|| {
                first_str(
                    event,
                    &[
                        "/call/customer/number",
                        "/call/phoneNumber",
                        "/call/phoneNumberE164",
                        "/customer/number",
                    ],
                )
            })
            .unwrap_or_default();

        let address_raw = fields.address.unwrap_or_default();
        let damage_type = fields.damage_type.unwrap_or_default();
        let urgency = classify_urgency(fields.urgency.as_deref(), &transcript);

        let issue_summary = match fields.summary {
            Some(summary) => summary,
            None if !damage_type.is_empty() => format!("{urgency} - {damage_type}"),
            None => transcript.clone(),
        };

        Lead {
            call_id: call_id(event).unwrap_or_default(),
            first_name,
            last_name,
            phone_e164: to_e164(&phone_raw),
            phone_raw,
            address_components: parse_address(&address_raw, &self.default_city),
            address_raw,
            damage_type,
            issue_summary: truncate_chars(&issue_summary, MAX_SUMMARY_CHARS),
            urgency,
            referral_source: fields.referral_source.unwrap_or_default(),
            appointment_datetime: booked.map(|b| b.datetime_raw).or(fields.appointment),
            recording_url: first_str(
                event,
                &["/recordingUrl", "/artifact/recordingUrl", "/call/recordingUrl"],
            ),
            call_duration_seconds: call_duration(event),
            raw_transcript: Some(truncate_chars(&transcript, MAX_TRANSCRIPT_CHARS))
                .filter(|t| !t.is_empty()),
            crm_contact_id: None,
            sink_results: Default::default(),
        }
    }
}

/// `"John Q Public"` → `("John", "Q Public")`.
pub fn split_name(full: &str) -> (String, String) {
    let mut parts = full.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest = parts.collect::<Vec<_>>().join(" ");
    (first, rest)
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn call_duration(event: &Value) -> Option<u64> {
    let explicit = ["/durationSeconds", "/call/durationSeconds", "/duration"]
        .iter()
        .filter_map(|p| event.pointer(p))
        .find_map(Value::as_f64);
    if let Some(secs) = explicit.filter(|s| *s >= 0.0) {
        return Some(secs.round() as u64);
    }

    let parse = |p: &str| {
        first_str(event, &[p]).and_then(|s| OffsetDateTime::parse(&s, &Rfc3339).ok())
    };
    let started = parse("/startedAt").or_else(|| parse("/call/startedAt"))?;
    let ended = parse("/endedAt").or_else(|| parse("/call/endedAt"))?;
    u64::try_from((ended - started).whole_seconds()).ok()
}
