use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Every request is bounded by this timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully resolved request, ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// What came back from the target
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Header values, multiple values joined with ", "
    pub headers: BTreeMap<String, String>,
    /// When the status line and headers arrived, before the body was read
    pub received_at: Instant,
    /// Body bytes, or the error hit while reading them
    pub body: Result<Bytes, TransportError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("{0}")]
    Other(String),
}

/// Set `name` to `value`, replacing any entry whose name differs only in case
pub fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: String) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value);
}

pub fn has_header(headers: &BTreeMap<String, String>, name: &str) -> bool {
    headers.keys().any(|key| key.eq_ignore_ascii_case(name))
}

/// Convert request headers into a [`HeaderMap`]; for names that collide
/// case-insensitively the last one in map order wins.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid header name: {}", name)))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            TransportError::InvalidRequest(format!("invalid value for header {}", name))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Capability to send one HTTP request
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// [`Transport`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport; `insecure` skips TLS certificate validation
    pub fn new(insecure: bool) -> Result<Self, TransportError> {
        let mut client_builder = Client::builder().timeout(REQUEST_TIMEOUT);

        if insecure {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        let client = self.client.clone();
        async move {
            let method = Method::from_bytes(request.method.as_bytes())
                .map_err(|_| TransportError::InvalidMethod(request.method.clone()))?;

            let mut request_builder = client
                .request(method, request.url.as_str())
                .timeout(request.timeout)
                .headers(header_map(&request.headers)?);

            if let Some(body) = request.body {
                request_builder = request_builder.body(body);
            }

            let response = request_builder
                .send()
                .await
                .map_err(|e| classify(e, request.timeout))?;
            let received_at = Instant::now();

            let status = response.status().as_u16();
            let mut headers = BTreeMap::new();
            for name in response.headers().keys() {
                let joined = response
                    .headers()
                    .get_all(name)
                    .iter()
                    .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                    .collect::<Vec<_>>()
                    .join(", ");
                headers.insert(name.as_str().to_string(), joined);
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Body(e.to_string()));

            Ok(TransportResponse {
                status,
                headers,
                received_at,
                body,
            })
        }
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}
