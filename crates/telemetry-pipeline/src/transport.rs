//! Network transport seam.
//!
//! [`Transport`] uses native `async fn`-style methods (`impl Future` return
//! types), which are not object-safe. The sender stores transports as
//! `Arc<dyn TransportBoxed>`; every `Transport` gets `TransportBoxed` through a
//! blanket impl.

use crate::error::{ConfigError, ExportError};
use crate::headers::Headers;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// One outbound POST.
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    pub headers: Headers,
    pub content_type: String,
    /// Set when the body is compressed.
    pub content_encoding: Option<&'static str>,
    /// Fully encoded body; `Content-Length` is taken from it.
    pub body: Vec<u8>,
}

/// Whatever the collector answered, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub message: String,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends request bytes and reports the response or a transport failure.
///
/// Transport-level failures (connection refused, timeouts, TLS) are reported
/// as [`ExportError::Transport`]; any HTTP status is an `Ok` response.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, ExportError>> + Send;

    /// Releases pooled connections. Later sends fail with `Shutdown`.
    fn shutdown(&self);

    fn name(&self) -> &str;
}

/// Object-safe view of [`Transport`].
pub trait TransportBoxed: Send + Sync {
    fn send_boxed(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, ExportError>> + Send + '_>>;

    fn shutdown(&self);

    fn name(&self) -> &str;
}

impl<T: Transport> TransportBoxed for T {
    fn send_boxed(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, ExportError>> + Send + '_>> {
        Box::pin(Transport::send(self, request))
    }

    fn shutdown(&self) {
        Transport::shutdown(self);
    }

    fn name(&self) -> &str {
        Transport::name(self)
    }
}

/// HTTP POST transport over `reqwest`.
pub struct HttpTransport {
    endpoint: reqwest::Url,
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    /// `timeout` bounds each individual request, not the retry sequence.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = reqwest::Url::parse(endpoint)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            endpoint,
            client: RwLock::new(Some(client)),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, ExportError> {
        let client = self.client().ok_or(ExportError::Shutdown)?;

        let mut builder = client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, request.content_type);
        if let Some(encoding) = request.content_encoding {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.body(request.body).send().await.map_err(|e| {
            if e.is_builder() {
                ExportError::InvalidRequest(e.to_string())
            } else {
                ExportError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        debug!(status = status.as_u16(), bytes = body.len(), "collector responded");
        Ok(TransportResponse {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
            body: body.to_vec(),
        })
    }

    fn shutdown(&self) {
        // Dropping the last client handle closes its idle connections.
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn name(&self) -> &str {
        "http"
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}
