//! Downstream delivery targets.  Each one is independent: a failure here is reported back to the
//! orchestrator as an `Err` and never stops the others from running.

mod calendar;
mod crm;
mod sheets;
mod sms;

pub use calendar::CalendarSink;
pub use crm::AlbiwareSink;
pub use sheets::SheetsSink;
pub use sms::TwilioSmsSink;

use crate::calendar::CalendarClient;
use crate::config::Config;
use crate::error::SinkError;
use crate::types::{Lead, SinkKind};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// A successful delivery.  `reference` is the id the remote side assigned, when it gives one.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Delivery {
    pub detail: String,
    pub reference: Option<String>,
}

impl Delivery {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            reference: None,
        }
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Why this lead should not go to this sink at all, if it shouldn't.
    fn skip_reason(&self, _lead: &Lead) -> Option<&'static str> {
        None
    }

    async fn deliver(&self, lead: &Lead) -> Result<Delivery, SinkError>;
}

/// Instantiate the enabled sinks in their configured order.  Enabled sinks without credentials
/// are left out.
pub fn build_sinks(
    config: &Config,
    http: &reqwest::Client,
    calendar: Option<Arc<CalendarClient>>,
) -> Vec<Arc<dyn Sink>> {
    config
        .enabled_sinks
        .iter()
        .filter_map(|kind| {
            if !config.is_configured(*kind) {
                warn!(sink=%kind, "sink enabled but not configured; skipping");
                return None;
            }
            let sink: Option<Arc<dyn Sink>> = match kind {
                SinkKind::Crm => config
                    .albiware
                    .clone()
                    .map(|c| Arc::new(AlbiwareSink::new(http.clone(), c)) as Arc<dyn Sink>),
                SinkKind::Spreadsheet => config.apps_script_url.as_deref().map(|url| {
                    Arc::new(SheetsSink::new(http.clone(), url, config.business_offset))
                        as Arc<dyn Sink>
                }),
                SinkKind::Sms => config.twilio.clone().map(|c| {
                    Arc::new(TwilioSmsSink::new(http.clone(), c, config.business_offset))
                        as Arc<dyn Sink>
                }),
                SinkKind::Calendar => calendar
                    .clone()
                    .map(|client| Arc::new(CalendarSink::new(client)) as Arc<dyn Sink>),
            };
            sink
        })
        .collect()
}
