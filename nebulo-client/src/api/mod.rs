//! Server API
//!
//! The network is reached through two seams:
//!
//! * [`Connector`] turns a [`TlsContext`] into a [`Transport`]
//! * [`Transport`] sends one request and returns the raw response body, or
//!   an error when the status is not the expected one
//!
//! [`ApiClient`] implements the endpoints on top of any transport and bounds
//! every call with a timeout.

pub mod http;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use nebulo_keys::TlsContext;
use serde::de::DeserializeOwned;

use crate::error::{Result, TransportError};
use crate::models::{
    Channel, ChannelCreateRequest, IncomingMessage, MessageCreateRequest, ServerVersion, User,
};

pub use http::{HttpConnector, HttpTransport};

/// Budget for a single request when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_PEM: &str = "application/x-pem-file";

/// Page size of the message list call; negative means newest first
pub const MESSAGE_LIST_LIMIT: i64 = -50;

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;

/// Value sent as `User-Agent`
pub fn user_agent() -> String {
    format!("nebulo-desktop/{}", env!("CARGO_PKG_VERSION"))
}

/// One request/response exchange with the server
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `endpoint` (relative to the base URL) with `query` parameters
    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        expected_status: u16,
    ) -> std::result::Result<Vec<u8>, TransportError>;

    /// POST `body` to `endpoint`
    async fn post(
        &self,
        endpoint: &str,
        content_type: &str,
        body: Vec<u8>,
        expected_status: u16,
    ) -> std::result::Result<Vec<u8>, TransportError>;
}

/// Creates transports bound to a TLS context
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    fn connect(&self, tls: &TlsContext) -> Result<Self::Transport>;
}

/// Extract a human readable message from an error response body.
///
/// Understands `{"errors": [...]}`, `{"error": ...}` and `{"message": ...}`
/// shapes and falls back to the raw text.
pub fn error_detail(body: &[u8]) -> String {
    fn text_of(value: &serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => ["detail", "message", "error", "title"]
                .iter()
                .find_map(|key| map.get(*key).and_then(text_of)),
            _ => None,
        }
    }

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            let messages: Vec<String> = errors.iter().filter_map(text_of).collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
        if let Some(message) = text_of(&value) {
            return message;
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "no detail provided".to_string()
    } else {
        text.chars().take(512).collect()
    }
}

/// Escape a channel name for use as a path segment.
///
/// Form encoding writes a space as `+`, which a path reads as a literal
/// plus; a literal `+` is already escaped as `%2B`.
fn escape_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Typed access to the server endpoints
pub struct ApiClient<T> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)], expected: u16) -> Result<Vec<u8>> {
        log::debug!("GET {endpoint}");
        let body = tokio::time::timeout(self.timeout, self.transport.get(endpoint, query, expected))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;
        Ok(body)
    }

    async fn post(
        &self,
        endpoint: &str,
        content_type: &str,
        body: Vec<u8>,
        expected: u16,
    ) -> Result<Vec<u8>> {
        log::debug!("POST {endpoint} ({content_type}, {} bytes)", body.len());
        let body = tokio::time::timeout(
            self.timeout,
            self.transport.post(endpoint, content_type, body, expected),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout))??;
        Ok(body)
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        expected: u16,
    ) -> Result<R> {
        let body = self.get(endpoint, query, expected).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Server build information; needs no client identity
    pub async fn version(&self) -> Result<ServerVersion> {
        self.get_json("version", &[], STATUS_OK).await
    }

    /// Submit a PEM certificate request, returns the signed PEM certificate
    pub async fn register(&self, csr_pem: &str) -> Result<String> {
        let body = self
            .post(
                "user",
                CONTENT_TYPE_PEM,
                csr_pem.as_bytes().to_vec(),
                STATUS_CREATED,
            )
            .await?;
        String::from_utf8(body).map_err(|e| {
            TransportError::Body(format!("certificate is not valid UTF-8: {e}")).into()
        })
    }

    /// Profile of the user the client certificate belongs to
    pub async fn user_profile(&self) -> Result<User> {
        self.get_json("user", &[], STATUS_OK).await
    }

    pub async fn channel_create(&self, name: &str, members_public_key: &[String]) -> Result<Channel> {
        let request = ChannelCreateRequest {
            name: name.to_string(),
            members_public_key: members_public_key.to_vec(),
        };
        let body = self
            .post(
                "chan",
                CONTENT_TYPE_JSON,
                serde_json::to_vec(&request)?,
                STATUS_OK,
            )
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Channels the user is a member of, by name
    pub async fn channel_list(&self) -> Result<HashMap<String, Channel>> {
        let list: Option<HashMap<String, Channel>> = self.get_json("chans", &[], STATUS_OK).await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn message_create(&self, request: &MessageCreateRequest) -> Result<()> {
        let endpoint = format!("chan/{}/message", escape_segment(&request.channel_name));
        self.post(
            &endpoint,
            CONTENT_TYPE_JSON,
            serde_json::to_vec(request)?,
            STATUS_CREATED,
        )
        .await?;
        Ok(())
    }

    /// Messages of `channel` posted after `last_read`
    pub async fn message_list(
        &self,
        channel: &str,
        last_read: DateTime<Utc>,
    ) -> Result<Vec<IncomingMessage>> {
        let endpoint = format!("chan/{}/messages", escape_segment(channel));
        let query = [
            (
                "last_read",
                last_read.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("limit", MESSAGE_LIST_LIMIT.to_string()),
        ];
        let list: Option<Vec<IncomingMessage>> =
            self.get_json(&endpoint, &query, STATUS_OK).await?;
        Ok(list.unwrap_or_default())
    }
}
