//! HTTP transport configuration

use bulwark_config::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every connection a [`ReqwestTransport`](crate::ReqwestTransport) opens.
///
/// Per-attempt timeouts are not set here: they come from each service's
/// configuration and travel with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Time allowed to establish a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Maximum number of redirects to follow
    pub max_redirects: u32,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            user_agent: format!("Bulwark/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&NetworkConfig> for HttpConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            ..Self::default()
        }
    }
}
