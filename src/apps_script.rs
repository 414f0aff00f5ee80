use crate::error::SinkError;

use serde::Serialize;
use serde_json::Value;
use tracing::trace;

/// Thin JSON client for a Google Apps Script web app acting as a proxy for Sheets/Calendar.
#[derive(Clone)]
pub struct AppsScriptClient {
    http: reqwest::Client,
    url: String,
}

impl AppsScriptClient {
    pub fn new(http: reqwest::Client, url: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
        }
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, body: &T) -> Result<Value, SinkError> {
        let resp = self.http.post(&self.url).json(body).send().await?;
        Self::read(resp).await
    }

    pub async fn get_json(&self, query: &[(&str, &str)]) -> Result<Value, SinkError> {
        let resp = self.http.get(&self.url).query(query).send().await?;
        Self::read(resp).await
    }

    async fn read(resp: reqwest::Response) -> Result<Value, SinkError> {
        let status = resp.status();
        let text = resp.text().await?;
        trace!(%status, body=%text, "apps script response");
        if status != reqwest::StatusCode::OK {
            return Err(SinkError::status(status, &text));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| SinkError::Response(format!("not json ({e})")))?;
        script_error(&body).map_or(Ok(body), Err)
    }
}

/// Scripts answer 200 even when they fail, flagging it with `"status": "error"` instead.
fn script_error(body: &Value) -> Option<SinkError> {
    let failed = body.get("status").and_then(Value::as_str) == Some("error")
        || body.get("success").and_then(Value::as_bool) == Some(false);
    failed.then(|| {
        let message = ["message", "error"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_str))
            .unwrap_or("script reported an error");
        SinkError::Rejected(message.to_string())
    })
}
