//! Transport boundary: send one request, get back status and body or a transport error

use async_trait::async_trait;
use reqwest::{
    header::{HeaderName, HeaderValue},
    Client,
};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;
use crate::types::HttpMethod;

/// Failures below the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// A fully resolved request handed to a [`Transport`]
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Deadline for this single attempt
    pub timeout: Duration,
}

/// Status, headers and raw body of a response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Response with a status and a JSON body
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    /// Response with a status and no body
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `Retry-After` in delta-seconds form; HTTP-date values are ignored
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Pluggable "send request, receive status + body" function
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Decides which server certificates a [`ReqwestTransport`] accepts
pub trait TrustPolicy: Send + Sync + fmt::Debug {
    fn configure(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, TransportError>;
}

/// Trust the platform's built-in root store
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrust;

impl TrustPolicy for SystemTrust {
    fn configure(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, TransportError> {
        Ok(builder)
    }
}

/// Trust only the given PEM-encoded root certificates
#[derive(Debug, Clone)]
pub struct PinnedRoots {
    roots: Vec<Vec<u8>>,
}

impl PinnedRoots {
    /// Pin a set of PEM roots. Each one must parse.
    pub fn from_pem(roots: Vec<Vec<u8>>) -> Result<Self, TransportError> {
        if roots.is_empty() {
            return Err(TransportError::InvalidRequest(
                "at least one pinned root is required".to_string(),
            ));
        }
        for pem in &roots {
            parse_certificate(pem)?;
        }
        Ok(Self { roots })
    }

    /// Pin the roots found in a PEM file
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| {
            TransportError::InvalidRequest(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_pem(vec![pem])
    }
}

impl TrustPolicy for PinnedRoots {
    fn configure(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, TransportError> {
        let mut builder = builder.tls_built_in_root_certs(false);
        for pem in &self.roots {
            builder = builder.add_root_certificate(parse_certificate(pem)?);
        }
        Ok(builder)
    }
}

fn parse_certificate(pem: &[u8]) -> Result<reqwest::Certificate, TransportError> {
    // The rustls backend defers PEM parsing to client build time
    if !String::from_utf8_lossy(pem).contains("-----BEGIN CERTIFICATE-----") {
        return Err(TransportError::InvalidRequest(
            "no PEM certificate block found".to_string(),
        ));
    }
    reqwest::Certificate::from_pem(pem)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid certificate: {}", e)))
}

/// [`Transport`] backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport trusting the system roots
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        Self::with_trust(config, Arc::new(SystemTrust))
    }

    /// Create a transport with a custom trust policy
    pub fn with_trust(
        config: &HttpConfig,
        trust: Arc<dyn TrustPolicy>,
    ) -> Result<Self, TransportError> {
        debug!(
            "Creating HTTP transport (connect timeout {:?}, trust {:?})",
            config.connect_timeout, trust
        );

        let builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ));

        let client = trust
            .configure(builder)?
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.into(), request.url.clone())
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            let name = HeaderName::from_str(name)
                .map_err(|_| TransportError::InvalidRequest(format!("bad header name {}", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                TransportError::InvalidRequest(format!("bad value for header {}", name))
            })?;
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(classify_reqwest_error)?
            .to_vec();

        debug!(
            "{} {} -> {} ({} bytes)",
            request.method,
            request.url,
            status,
            body.len()
        );

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a reqwest failure onto the transport taxonomy
fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    let message = error.to_string();

    if error.is_timeout() {
        return TransportError::Timeout;
    }
    if error.is_builder() {
        return TransportError::InvalidRequest(message);
    }
    if error.is_connect() {
        return match io_error_kind(&error) {
            Some(ErrorKind::ConnectionRefused) => TransportError::ConnectionRefused(message),
            Some(ErrorKind::NetworkUnreachable) | Some(ErrorKind::HostUnreachable) => {
                TransportError::Offline(message)
            }
            _ if mentions_dns(&error) => TransportError::Offline(message),
            _ => TransportError::ConnectionRefused(message),
        };
    }
    TransportError::ConnectionLost(message)
}

fn io_error_kind(error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = err.source();
    }
    None
}

fn mentions_dns(error: &(dyn StdError + 'static)) -> bool {
    let mut source = error.source();
    while let Some(err) = source {
        if err.to_string().to_ascii_lowercase().contains("dns") {
            return true;
        }
        source = err.source();
    }
    false
}
