/// Outbound crash-report transport.
///
/// The reporter only needs "send this text, did it land"; the default
/// implementation posts a Discord-style webhook message.
use crate::config::CrashReportConfig;
use serde::Serialize;
use std::time::Duration;

/// Largest message body the webhook accepts, in UTF-8 bytes.
pub const MESSAGE_LIMIT: usize = 2000;

pub trait WebhookTransport {
    fn send(&self, message: &str) -> Result<(), TransportError>;
}

/// Errors produced by the webhook transport.
#[derive(Debug)]
pub enum TransportError {
    /// No webhook URL configured.
    NotConfigured,
    /// Message longer than `MESSAGE_LIMIT` bytes.
    TooLarge { bytes: usize },
    /// Failed to start the async runtime used for the request.
    Runtime(std::io::Error),
    Http(reqwest::Error),
    /// The endpoint answered with a non-success status.
    Status(reqwest::StatusCode),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotConfigured => write!(f, "no webhook URL configured"),
            TransportError::TooLarge { bytes } => {
                write!(f, "message is {bytes} bytes, limit is {MESSAGE_LIMIT}")
            }
            TransportError::Runtime(e) => write!(f, "cannot start runtime: {e}"),
            TransportError::Http(e) => write!(f, "webhook request failed: {e}"),
            TransportError::Status(status) => write!(f, "webhook returned {status}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Runtime(e) => Some(e),
            TransportError::Http(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts `{"content": ...}` to a webhook URL.
#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    url: Option<String>,
    timeout: Duration,
}

impl DiscordWebhook {
    #[cfg(test)]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: Some(url.into()),
            timeout,
        }
    }

    pub fn from_config(config: &CrashReportConfig) -> Self {
        Self {
            url: config.webhook_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn post(&self, url: &str, message: &str) -> Result<(), TransportError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(TransportError::Http)?;

        let resp = client
            .post(url)
            .json(&WebhookMessage { content: message })
            .send()
            .await
            .map_err(TransportError::Http)?;

        if !resp.status().is_success() {
            return Err(TransportError::Status(resp.status()));
        }
        Ok(())
    }
}

impl WebhookTransport for DiscordWebhook {
    fn send(&self, message: &str) -> Result<(), TransportError> {
        let url = self.url.as_deref().ok_or(TransportError::NotConfigured)?;
        let bytes = message.len();
        if bytes > MESSAGE_LIMIT {
            return Err(TransportError::TooLarge { bytes });
        }

        // The supervisor is single-threaded; a runtime only exists for the
        // duration of the request.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;
        tracing::debug!(url, bytes, "posting crash report");
        runtime.block_on(self.post(url, message))
    }
}
