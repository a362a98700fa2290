use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use blaster_core::config::TransportConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{MediaPayload, Transport};

/// Chat-id suffix the bridge expects for personal accounts.
const CHAT_SUFFIX: &str = "@c.us";

/// [`Transport`] over a WhatsApp HTTP bridge.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct RegisteredResponse {
    registered: bool,
}

impl HttpTransport {
    pub fn new(cfg: &TransportConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(cfg.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn chat_id(address: &str) -> String {
        format!("{address}{CHAT_SUFFIX}")
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let resp = self
            .apply_auth(builder)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "bridge returned an error");
        Err(classify_status(status, text))
    }

    fn map_send_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Unavailable(format!("timed out after {}ms", self.timeout_ms))
        } else {
            TransportError::Unavailable(e.to_string())
        }
    }
}

/// Map a non-2xx bridge status onto a transport error.
fn classify_status(status: u16, body: String) -> TransportError {
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.trim())
    };
    match status {
        503 => TransportError::Unavailable(message),
        _ => TransportError::Rejected(message),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "whatsapp-http"
    }

    async fn is_reachable(&self, address: &str) -> Result<bool, TransportError> {
        let url = format!(
            "{}/contacts/{}/registered",
            self.base_url,
            Self::chat_id(address)
        );
        let resp = self.execute(self.client.get(&url)).await?;
        let body: RegisteredResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Rejected(format!("unexpected response: {e}")))?;
        debug!(address, registered = body.registered, "registration lookup");
        Ok(body.registered)
    }

    async fn send_text(&self, address: &str, body: &str) -> Result<(), TransportError> {
        let url = format!("{}/messages/text", self.base_url);
        let payload = json!({
            "chatId": Self::chat_id(address),
            "text": body,
        });
        self.execute(self.client.post(&url).json(&payload)).await?;
        debug!(address, "text sent");
        Ok(())
    }

    async fn send_media(&self, address: &str, media: &MediaPayload) -> Result<(), TransportError> {
        let url = format!("{}/messages/media", self.base_url);
        let payload = json!({
            "chatId": Self::chat_id(address),
            "mimeType": media.mime_type,
            "filename": media.display_name,
            "data": base64::engine::general_purpose::STANDARD.encode(&media.bytes),
        });
        self.execute(self.client.post(&url).json(&payload)).await?;
        debug!(address, file = %media.display_name, "media sent");
        Ok(())
    }
}
