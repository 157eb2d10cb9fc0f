//! Provider health probe for a `/health` endpoint.
//!
//! [`HealthService::check`] is resilient and never fails: transport and status
//! errors become `ok = false` with a short message.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::providers::{ProviderClient, SearchProvider};

/// A serializable health snapshot of the active provider.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Provider identifier ("opensearch", "zoekt").
    pub provider: String,
    /// Provider base URL.
    pub endpoint: String,
    pub ok: bool,
    /// Latency of the probe request in milliseconds.
    pub latency_ms: u128,
    pub message: String,
}

impl HealthStatus {
    #[inline]
    fn ok(provider: &str, endpoint: &str, latency_ms: u128, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            ok: true,
            latency_ms,
            message: message.into(),
        }
    }

    #[inline]
    fn fail(provider: &str, endpoint: &str, latency_ms: u128, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            ok: false,
            latency_ms,
            message: message.into(),
        }
    }
}

/// Health checker over the provider's own HTTP client.
#[derive(Debug, Clone)]
pub struct HealthService {
    provider: ProviderClient,
}

impl HealthService {
    pub fn new(provider: ProviderClient) -> Self {
        Self { provider }
    }

    /// Probes the provider once. Never returns an error.
    pub async fn check(&self) -> HealthStatus {
        let name = self.provider.name();
        let endpoint = self.provider.endpoint();

        let start = Instant::now();
        let result = self.provider.ping().await;
        let latency_ms = start.elapsed().as_millis();

        match result {
            Ok(()) => {
                info!(provider = name, endpoint, latency_ms, "health probe completed");
                HealthStatus::ok(name, endpoint, latency_ms, format!("{name} is reachable"))
            }
            Err(err) => {
                warn!(
                    provider = name,
                    endpoint,
                    latency_ms,
                    error = %err,
                    "health probe failed"
                );
                HealthStatus::fail(name, endpoint, latency_ms, err.to_string())
            }
        }
    }
}
