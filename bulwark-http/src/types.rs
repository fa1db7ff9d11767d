//! Request types: HTTP method, cache policy and per-call request context

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// HTTP methods supported by the resilient client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    /// Get the string representation of the HTTP method
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err(ParseError::InvalidMethod(s.to_string())),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

/// How a request interacts with the fallback cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Go to the network; use the cache only when the network fails
    #[default]
    NetworkFirst,
    /// Serve a live cache entry without touching the network
    CacheFirst,
    /// Never read or write the cache
    NetworkOnly,
}

impl CachePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachePolicy::NetworkFirst => "network-first",
            CachePolicy::CacheFirst => "cache-first",
            CachePolicy::NetworkOnly => "network-only",
        }
    }

    /// Whether the cache takes part in the request at all
    pub fn uses_cache(&self) -> bool {
        !matches!(self, CachePolicy::NetworkOnly)
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CachePolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "network-first" => Ok(CachePolicy::NetworkFirst),
            "cache-first" => Ok(CachePolicy::CacheFirst),
            "network-only" => Ok(CachePolicy::NetworkOnly),
            _ => Err(ParseError::InvalidCachePolicy(s.to_string())),
        }
    }
}

/// Errors that can occur when parsing request options
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid HTTP method: '{0}'. Supported methods are: GET, POST, PUT, DELETE, PATCH, HEAD")]
    InvalidMethod(String),

    #[error("Invalid cache policy: '{0}'. Expected network-first, cache-first or network-only")]
    InvalidCachePolicy(String),
}

/// One logical request, owned by the caller for the duration of the call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Absolute URL, or a path resolved against the service base URL.
    /// Also the key the request throttler counts under.
    pub endpoint: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub cache_policy: CachePolicy,
    /// Overrides the derived `METHOD:url` cache key
    pub cache_key: Option<String>,
}

impl RequestContext {
    /// Create a request for `endpoint`
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: Vec::new(),
            body: None,
            cache_policy: CachePolicy::default(),
            cache_key: None,
        }
    }

    /// Shorthand for a GET request
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Cache key for this request once its URL is resolved
    pub fn cache_key_for(&self, url: &Url) -> String {
        match &self.cache_key {
            Some(key) => key.clone(),
            None => format!("{}:{}", self.method, url),
        }
    }
}
