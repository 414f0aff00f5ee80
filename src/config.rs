use crate::error::ConfigError;
use crate::phone::normalize_phone;
use crate::types::SinkKind;

use std::env;
use std::time::Duration;
use time::macros::offset;
use time::UtcOffset;

const DEFAULT_ALBIWARE_BASE_URL: &str = "https://api.albiware.com/v5/Integrations";
const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Clone, Debug)]
pub struct TwilioConfig {
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub recipients: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AlbiwareConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub script_url: String,
    pub calendar_id: String,
}

/// Deployment settings, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub apps_script_url: Option<String>,
    pub twilio: Option<TwilioConfig>,
    pub albiware: Option<AlbiwareConfig>,
    pub calendar: Option<CalendarConfig>,
    pub business_offset: UtcOffset,
    pub business_time_zone: String,
    pub appointment_duration: time::Duration,
    pub default_city: String,
    pub sink_timeout: Duration,
    pub enabled_sinks: Vec<SinkKind>,
    pub store_ttl: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            apps_script_url: None,
            twilio: None,
            albiware: None,
            calendar: None,
            business_offset: offset!(-8),
            business_time_zone: "America/Los_Angeles".to_string(),
            appointment_duration: time::Duration::minutes(120),
            default_city: "Las Vegas".to_string(),
            sink_timeout: Duration::from_secs(10),
            enabled_sinks: SinkKind::ALL.to_vec(),
            store_ttl: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` is this over the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Config::default();

        let twilio = match (
            var("TWILIO_ACCOUNT_SID"),
            var("TWILIO_AUTH_TOKEN"),
            var("TWILIO_FROM_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioConfig {
                api_base: var("TWILIO_API_BASE")
                    .unwrap_or_else(|| DEFAULT_TWILIO_API_BASE.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                account_sid,
                auth_token,
                from_number: normalize_phone(&from_number),
                recipients: parse_recipients(&var("SMS_RECIPIENTS").unwrap_or_default()),
            }),
            _ => None,
        };

        let albiware = var("ALBIWARE_API_KEY").map(|api_key| AlbiwareConfig {
            api_key,
            base_url: var("ALBIWARE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_ALBIWARE_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        });

        let calendar = var("CALENDAR_SCRIPT_URL").map(|script_url| CalendarConfig {
            script_url,
            calendar_id: var("GOOGLE_CALENDAR_ID").unwrap_or_else(|| "primary".to_string()),
        });

        let business_offset = match var("BUSINESS_UTC_OFFSET") {
            Some(raw) => parse_offset(&raw).ok_or_else(|| ConfigError::Invalid {
                var: "BUSINESS_UTC_OFFSET",
                reason: format!("expected ±HH:MM, got '{raw}'"),
            })?,
            None => defaults.business_offset,
        };

        let enabled_sinks = match var("ENABLED_SINKS") {
            Some(raw) => parse_sink_list(&raw).map_err(|reason| ConfigError::Invalid {
                var: "ENABLED_SINKS",
                reason,
            })?,
            None => defaults.enabled_sinks,
        };

        Ok(Self {
            port: parse_number(&var, "PORT")?.unwrap_or(defaults.port),
            apps_script_url: var("APPS_SCRIPT_URL"),
            twilio,
            albiware,
            calendar,
            business_offset,
            business_time_zone: var("BUSINESS_TIME_ZONE").unwrap_or(defaults.business_time_zone),
            appointment_duration: positive::<i64>(&var, "APPOINTMENT_DURATION_MINUTES")?
                .map(time::Duration::minutes)
                .unwrap_or(defaults.appointment_duration),
            default_city: var("DEFAULT_CITY").unwrap_or(defaults.default_city),
            sink_timeout: positive::<u64>(&var, "SINK_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sink_timeout),
            enabled_sinks,
            store_ttl: parse_number(&var, "STORE_TTL_SECS")?.map(Duration::from_secs),
        })
    }

    pub fn is_configured(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::Crm => self.albiware.is_some(),
            SinkKind::Spreadsheet => self.apps_script_url.is_some(),
            SinkKind::Sms => self
                .twilio
                .as_ref()
                .map(|t| !t.recipients.is_empty())
                .unwrap_or(false),
            SinkKind::Calendar => self.calendar.is_some(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                var: key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Like `parse_number`, but zero and negative values are rejected.
fn positive<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    match parse_number::<T>(var, key)? {
        Some(n) if n <= T::default() => Err(ConfigError::Invalid {
            var: key,
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}

pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(normalize_phone)
        .collect()
}

/// Parses an ordered, comma separated sink list.  Duplicates keep their first position.
pub fn parse_sink_list(raw: &str) -> Result<Vec<SinkKind>, String> {
    let mut sinks = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind: SinkKind = part.parse()?;
        if !sinks.contains(&kind) {
            sinks.push(kind);
        }
    }
    Ok(sinks)
}

/// Accepts `-08:00`, `+05:30`, `-8` and `Z`.
pub fn parse_offset(raw: &str) -> Option<UtcOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }
    let (sign, rest) = match raw.as_bytes().first()? {
        b'-' => (-1i8, &raw[1..]),
        b'+' => (1i8, &raw[1..]),
        _ => (1i8, raw),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i8>().ok()?, m.parse::<i8>().ok()?),
        None => (rest.parse::<i8>().ok()?, 0),
    };
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}
