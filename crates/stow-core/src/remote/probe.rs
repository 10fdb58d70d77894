//! Reachability check used to short-circuit passes while offline

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{normalize_base_url, EngineConfig};
use crate::error::{Error, Result};

/// Answers "is the remote service reachable right now?"
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// `GET {base_url}/healthz` with a short timeout
#[derive(Clone)]
pub struct HttpConnectivityProbe {
    health_url: String,
    client: reqwest::Client,
}

impl HttpConnectivityProbe {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build probe client: {error}")))?;
        Ok(Self {
            health_url: format!("{base_url}/healthz"),
            client,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.api_base_url.clone(), config.probe_timeout)
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(status = %response.status(), "health check failed");
                false
            }
            Err(error) => {
                debug!(%error, "health check unreachable");
                false
            }
        }
    }
}

/// Probe that never reports offline
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

#[async_trait]
impl ConnectivityProbe for AlwaysReachable {
    async fn is_reachable(&self) -> bool {
        true
    }
}
