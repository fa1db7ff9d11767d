//! One resilient client per configured service

use bulwark_config::{domains::DEFAULT_SERVICE, NetworkConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::client::ResilientClient;
use crate::errors::{ClientError, ClientResult};
use crate::telemetry::SharedTelemetry;
use crate::transport::Transport;

/// Explicitly constructed set of service clients.
///
/// Each client owns its own breaker, throttler and cache directory
/// (`<cache_dir>/<service>`); the transport and telemetry sink are shared.
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<ResilientClient>>,
}

impl ClientRegistry {
    /// Build a client for every service in `config`. Must run inside a tokio runtime.
    pub fn from_config(
        config: &NetworkConfig,
        transport: Arc<dyn Transport>,
        telemetry: SharedTelemetry,
    ) -> ClientResult<Self> {
        config
            .validate_all()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        let mut clients = BTreeMap::new();
        for (name, service) in &config.services {
            let client = ResilientClient::builder(name.clone(), service.clone())
                .cache_dir(config.cache_dir_for(name))
                .transport(transport.clone())
                .telemetry(telemetry.clone())
                .build()?;
            clients.insert(name.clone(), Arc::new(client));
        }

        info!(
            "Client registry ready with {} services: {}",
            clients.len(),
            clients.keys().cloned().collect::<Vec<_>>().join(", ")
        );

        Ok(Self { clients })
    }

    /// Client for `name`, if configured
    pub fn client(&self, name: &str) -> Option<Arc<ResilientClient>> {
        self.clients.get(name).cloned()
    }

    /// Client for `name`, falling back to the `default` service
    pub fn client_or_default(&self, name: &str) -> Option<Arc<ResilientClient>> {
        self.client(name).or_else(|| self.client(DEFAULT_SERVICE))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Reset every breaker and throttler
    pub fn reset_all(&self) {
        for client in self.clients.values() {
            client.reset();
        }
    }
}
