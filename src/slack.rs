use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::SLACK_API_BASE;

/// Outbound chat primitives used by the runner and the listener.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str) -> Result<()>;

    async fn upload_file(
        &self,
        channel: &str,
        path: &Path,
        title: &str,
        initial_comment: &str,
    ) -> Result<()>;
}

/// Identity of the bot token, from `auth.test`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub user_id: String,
    #[serde(default)]
    pub user: String,
}

/// Slack Web API client authenticated with a bot token.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, SLACK_API_BASE)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    /// POST a JSON body to a Web API method and return the checked response.
    async fn call_json(&self, method: &str, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.method_url(method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Slack {method} request failed"))?;
        let value: Value = resp
            .json()
            .await
            .with_context(|| format!("Slack {method} returned invalid JSON"))?;
        check_ok(method, value)
    }

    /// POST form parameters to a Web API method and return the checked response.
    async fn call_form(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .post(self.method_url(method))
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await
            .with_context(|| format!("Slack {method} request failed"))?;
        let value: Value = resp
            .json()
            .await
            .with_context(|| format!("Slack {method} returned invalid JSON"))?;
        check_ok(method, value)
    }

    /// Resolve the bot's own user ID so its messages can be ignored.
    pub async fn auth_test(&self) -> Result<BotIdentity> {
        let value = self.call_form("auth.test", &[]).await?;
        serde_json::from_value(value).context("unexpected auth.test response")
    }

    /// Ask for a Socket Mode WebSocket URL. `app_token` must be an `xapp-` token.
    pub async fn open_socket_url(&self, app_token: &str) -> Result<String> {
        let resp = self
            .http
            .post(self.method_url("apps.connections.open"))
            .bearer_auth(app_token)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .send()
            .await
            .context("Slack apps.connections.open request failed")?;
        let value: Value = resp
            .json()
            .await
            .context("Slack apps.connections.open returned invalid JSON")?;
        let value = check_ok("apps.connections.open", value)?;
        value
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("apps.connections.open response has no url")
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        self.call_json(
            "chat.postMessage",
            &json!({ "channel": channel, "text": text, "mrkdwn": true }),
        )
        .await?;
        debug!("Posted message to {channel}");
        Ok(())
    }

    /// Upload through `files.getUploadURLExternal` → POST bytes →
    /// `files.completeUploadExternal`.
    async fn upload_file(
        &self,
        channel: &str,
        path: &Path,
        title: &str,
        initial_comment: &str,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let length = bytes.len().to_string();
        let ticket = self
            .call_form(
                "files.getUploadURLExternal",
                &[("filename", filename.as_str()), ("length", length.as_str())],
            )
            .await?;
        let upload_url = ticket
            .get("upload_url")
            .and_then(Value::as_str)
            .context("files.getUploadURLExternal response has no upload_url")?;
        let file_id = ticket
            .get("file_id")
            .and_then(Value::as_str)
            .context("files.getUploadURLExternal response has no file_id")?;

        let status = self
            .http
            .post(upload_url)
            .body(bytes)
            .send()
            .await
            .context("file upload request failed")?
            .status();
        if !status.is_success() {
            bail!("file upload failed with HTTP {status}");
        }

        self.call_json(
            "files.completeUploadExternal",
            &json!({
                "files": [{ "id": file_id, "title": title }],
                "channel_id": channel,
                "initial_comment": initial_comment,
            }),
        )
        .await?;
        info!("Uploaded {} to {channel}", path.display());
        Ok(())
    }
}

/// Turn a Web API response into an error unless it carries `"ok": true`.
pub fn check_ok(method: &str, value: Value) -> Result<Value> {
    if value.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(value);
    }
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    bail!("Slack {method} failed: {error}")
}

// ── Socket Mode ────────────────────────────────────────────────────

/// A Socket Mode frame. Every frame with an `envelope_id` must be acked.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Non-zero when Slack is redelivering an envelope it thinks went unacked.
    #[serde(default)]
    pub retry_attempt: u32,
}

impl SocketEnvelope {
    /// The inner message event of an `events_api` envelope, if it is one.
    pub fn message_event(&self) -> Option<MessageEvent> {
        if self.kind != "events_api" {
            return None;
        }
        let event = self.payload.as_ref()?.get("event")?;
        serde_json::from_value(event.clone()).ok()
    }

    pub fn is_retry(&self) -> bool {
        self.retry_attempt > 0
    }

    /// Acknowledgement frame for this envelope.
    pub fn ack(&self) -> Option<String> {
        self.envelope_id
            .as_ref()
            .map(|id| json!({ "envelope_id": id }).to_string())
    }
}

/// Inbound `message` / `app_mention` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_ok_accepts_ok() {
        let v = check_ok("x", json!({"ok": true, "url": "wss://a"})).unwrap();
        assert_eq!(v["url"], "wss://a");
    }

    #[test]
    fn check_ok_reports_error() {
        let err = check_ok("chat.postMessage", json!({"ok": false, "error": "channel_not_found"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Slack chat.postMessage failed: channel_not_found");
        assert!(check_ok("x", json!({})).is_err());
    }

    #[test]
    fn events_api_envelope() {
        let env: SocketEnvelope = serde_json::from_value(json!({
            "type": "events_api",
            "envelope_id": "abc-123",
            "accepts_response_payload": false,
            "payload": {
                "team_id": "T1",
                "event": {
                    "type": "message",
                    "channel": "C1",
                    "user": "U1",
                    "text": "!list",
                    "ts": "1700000000.000100"
                }
            }
        }))
        .unwrap();
        let event = env.message_event().unwrap();
        assert_eq!(event.kind, "message");
        assert_eq!(event.channel.as_deref(), Some("C1"));
        assert_eq!(event.user.as_deref(), Some("U1"));
        assert_eq!(event.text, "!list");
        assert_eq!(env.ack().unwrap(), r#"{"envelope_id":"abc-123"}"#);
        assert!(!env.is_retry());
    }

    #[test]
    fn redelivered_envelope_is_retry() {
        let env: SocketEnvelope = serde_json::from_value(json!({
            "type": "events_api",
            "envelope_id": "abc-124",
            "retry_attempt": 1,
            "retry_reason": "timeout",
            "payload": {"event": {"type": "message", "text": "!list"}}
        }))
        .unwrap();
        assert!(env.is_retry());
        assert!(env.ack().is_some());
    }

    #[test]
    fn hello_and_disconnect_envelopes() {
        let hello: SocketEnvelope =
            serde_json::from_str(r#"{"type":"hello","num_connections":1}"#).unwrap();
        assert!(hello.message_event().is_none());
        assert!(hello.ack().is_none());

        let bye: SocketEnvelope =
            serde_json::from_str(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
                .unwrap();
        assert_eq!(bye.reason.as_deref(), Some("refresh_requested"));
    }

    #[test]
    fn method_url_joins() {
        let client = SlackClient::with_base_url("xoxb-1", "https://slack.test/api/").unwrap();
        assert_eq!(client.method_url("auth.test"), "https://slack.test/api/auth.test");
    }
}
