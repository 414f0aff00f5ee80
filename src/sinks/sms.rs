use super::{Delivery, Sink};
use crate::calendar::{display_slot, parse_slot};
use crate::config::TwilioConfig;
use crate::error::SinkError;
use crate::types::{Lead, SinkKind, Urgency};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use time::UtcOffset;
use tracing::{debug, error, info};

#[derive(Deserialize, Debug)]
struct TwilioMessageResource {
    sid: String,
}

/// The notification text sent to staff for a new lead.
pub fn compose_message(lead: &Lead, offset: UtcOffset) -> String {
    let headline = match lead.urgency {
        Urgency::Emergency => "🚨 EMERGENCY LEAD",
        Urgency::Standard => "New Lead",
    };
    let or_unknown = |s: &str| if s.is_empty() { "N/A".to_string() } else { s.to_string() };

    let mut lines = vec![
        headline.to_string(),
        format!("Name: {}", or_unknown(&lead.full_name())),
        format!("Phone: {}", or_unknown(lead.phone_display())),
        format!("Address: {}", or_unknown(&lead.address_raw)),
        format!("Issue: {}", or_unknown(&lead.issue_summary)),
        format!("Urgency: {}", lead.urgency),
    ];
    if let Some(raw) = &lead.appointment_datetime {
        let when = parse_slot(raw, offset)
            .map(|at| display_slot(at, offset))
            .unwrap_or_else(|| raw.clone());
        lines.push(format!("Appointment: {when}"));
    }
    if let Some(id) = &lead.crm_contact_id {
        lines.push(format!("CRM ID: {id}"));
    }
    lines.join("\n")
}

pub struct TwilioSmsSink {
    http: reqwest::Client,
    config: TwilioConfig,
    offset: UtcOffset,
}

impl TwilioSmsSink {
    pub fn new(http: reqwest::Client, config: TwilioConfig, offset: UtcOffset) -> Self {
        Self {
            http,
            config,
            offset,
        }
    }

    async fn send_one(&self, to: &str, body: &str) -> Result<String, SinkError> {
        let account_sid = &self.config.account_sid;
        let url = format!(
            "{}/2010-04-01/Accounts/{account_sid}/Messages.json",
            self.config.api_base
        );
        let mut form = HashMap::new();
        form.insert("From", self.config.from_number.as_str());
        form.insert("To", to);
        form.insert("Body", body);
        let resp = self
            .http
            .post(url)
            .basic_auth(account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SinkError::status(status, &text));
        }
        let message: TwilioMessageResource = resp
            .json()
            .await
            .map_err(|e| SinkError::Response(e.to_string()))?;
        Ok(message.sid)
    }
}

#[async_trait]
impl Sink for TwilioSmsSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Sms
    }

    async fn deliver(&self, lead: &Lead) -> Result<Delivery, SinkError> {
        let body = compose_message(lead, self.offset);
        debug!(sms=%body, "sms body");

        let recipients = &self.config.recipients;
        let results = join_all(recipients.iter().map(|to| self.send_one(to, &body))).await;

        let mut sent = 0;
        let mut first_error = None;
        for (to, result) in recipients.iter().zip(results) {
            match result {
                Ok(sid) => {
                    info!(to=%to, sid=%sid, "sms sent");
                    sent += 1;
                }
                Err(e) => {
                    error!(to=%to, error=%e, "failed to send sms");
                    first_error.get_or_insert(e);
                }
            }
        }

        let total = recipients.len();
        if sent == 0 {
            return Err(match first_error {
                Some(e) => SinkError::Rejected(format!("0 of {total} messages sent: {e}")),
                None => SinkError::NotConfigured("no sms recipients"),
            });
        }
        Ok(Delivery::new(format!("sent {sent} of {total} messages")))
    }
}
