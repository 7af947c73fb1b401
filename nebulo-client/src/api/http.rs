//! HTTPS transport over reqwest, authenticated by the TLS context
//!
//! The rustls client configuration of the [`TlsContext`] is handed to reqwest
//! as is, so the server is verified against the configured CA and the client
//! certificate (when present) is offered during the handshake.

use std::time::Duration;

use async_trait::async_trait;
use nebulo_keys::TlsContext;
use reqwest::{Client, RequestBuilder, StatusCode};
use url::Url;

use super::{error_detail, user_agent, Connector, Transport};
use crate::error::{ClientError, Result, TransportError};

/// Builds [`HttpTransport`]s for one server
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: Url,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid base URL {base_url:?}: {e}")))?;
        if !matches!(base_url.scheme(), "https" | "http") {
            return Err(ClientError::Configuration(format!(
                "unsupported URL scheme {:?}",
                base_url.scheme()
            )));
        }
        // Relative joins drop the last segment unless the path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { base_url, timeout })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Connector for HttpConnector {
    type Transport = HttpTransport;

    fn connect(&self, tls: &TlsContext) -> Result<HttpTransport> {
        let client = Client::builder()
            .use_preconfigured_tls((*tls.client_config()).clone())
            .user_agent(user_agent())
            .timeout(self.timeout)
            .build()
            .map_err(|e| ClientError::Configuration(format!("unable to build HTTP client: {e}")))?;

        log::debug!(
            "HTTP client ready for {} (client auth: {})",
            self.base_url,
            tls.has_client_auth()
        );
        Ok(HttpTransport {
            client,
            base_url: self.base_url.clone(),
        })
    }
}

/// One HTTPS client bound to a base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    fn url(&self, endpoint: &str) -> std::result::Result<Url, TransportError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| TransportError::Connection(format!("invalid endpoint {endpoint:?}: {e}")))
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        expected_status: u16,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                map_reqwest_error(e)
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        if status.as_u16() == expected_status {
            return Ok(body.to_vec());
        }

        let detail = error_detail(&body);
        log::debug!("unexpected status {status}: {detail}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::Unauthorized {
                status: status.as_u16(),
                detail,
            }),
            _ => Err(TransportError::Status {
                expected: expected_status,
                received: status.as_u16(),
                detail,
            }),
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        // reqwest does not expose the configured budget
        TransportError::Timeout(Duration::ZERO)
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        expected_status: u16,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let url = self.url(endpoint)?;
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        self.execute(request, expected_status).await
    }

    async fn post(
        &self,
        endpoint: &str,
        content_type: &str,
        body: Vec<u8>,
        expected_status: u16,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let url = self.url(endpoint)?;
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.execute(request, expected_status).await
    }
}
