use std::sync::Arc;

use search_engine::{
    EngineConfig, HealthService, QueryRouter,
    error_handler::{ConfigError, env_opt, env_opt_u64, env_or, validate_http_endpoint},
};
use tracing::info;

use crate::core::reindex_queue::{DEFAULT_REINDEX_QUEUE_CAPACITY, ReindexQueue};

pub const DEFAULT_API_ADDRESS: &str = "0.0.0.0:8000";

/// HTTP-layer settings.
///
/// - `API_ADDRESS`            = bind address (default `0.0.0.0:8000`)
/// - `REINDEX_QUEUE_CAPACITY` = bounded reindex queue size (default 64)
/// - `INDEXER_WEBHOOK_URL`    = where queued reindex jobs are posted (optional)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub address: String,
    pub reindex_capacity: usize,
    pub indexer_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let reindex_capacity = match env_opt_u64("REINDEX_QUEUE_CAPACITY")? {
            None => DEFAULT_REINDEX_QUEUE_CAPACITY,
            Some(0) => {
                return Err(ConfigError::InvalidNumber {
                    var: "REINDEX_QUEUE_CAPACITY",
                    reason: "must be at least 1",
                });
            }
            Some(n) => usize::try_from(n).map_err(|_| ConfigError::InvalidNumber {
                var: "REINDEX_QUEUE_CAPACITY",
                reason: "value does not fit in usize",
            })?,
        };

        let indexer_webhook_url = env_opt("INDEXER_WEBHOOK_URL");
        if let Some(url) = &indexer_webhook_url {
            validate_http_endpoint("INDEXER_WEBHOOK_URL", url)?;
        }

        Ok(Self {
            address: env_or("API_ADDRESS", DEFAULT_API_ADDRESS),
            reindex_capacity,
            indexer_webhook_url,
        })
    }
}

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// Query engine bound to the configured provider.
    pub router: Arc<QueryRouter>,
    pub health: HealthService,
    pub reindex: ReindexQueue,
}

impl AppState {
    /// Loads both configuration layers from the environment and wires the
    /// engine. Must run inside a Tokio runtime (spawns the reindex forwarder).
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = AppConfig::from_env()?;
        let engine = EngineConfig::from_env()?;
        Self::new(config, &engine)
    }

    pub fn new(config: AppConfig, engine: &EngineConfig) -> Result<Self, ConfigError> {
        let router = QueryRouter::from_config(engine)?;
        let health = HealthService::new(router.provider().clone());
        let reindex = ReindexQueue::spawn(config.reindex_capacity, config.indexer_webhook_url.clone())?;

        info!(
            provider = %engine.provider.kind(),
            endpoint = router.provider().endpoint(),
            reindex_capacity = config.reindex_capacity,
            webhook = config.indexer_webhook_url.as_deref().unwrap_or("-"),
            "application state initialized"
        );

        Ok(Self {
            config,
            router: Arc::new(router),
            health,
            reindex,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use axum::{body::to_bytes, http::StatusCode, response::Response};
    use search_engine::{
        config::{ProviderConfig, ZoektConfig},
        regex_safety::RegexSafetyConfig,
    };
    use tokio::sync::mpsc;

    use super::*;
    use crate::core::reindex_queue::ReindexJob;

    /// State bound to a Zoekt provider on a closed local port. The reindex
    /// receiver is returned so the queue stays open and can be inspected.
    pub(crate) fn unreachable_state(
        reindex_capacity: usize,
    ) -> (Arc<AppState>, mpsc::Receiver<ReindexJob>) {
        let mut zoekt = ZoektConfig::new("http://127.0.0.1:9");
        zoekt.timeout = Duration::from_millis(500);
        let engine = EngineConfig {
            provider: ProviderConfig::Zoekt(zoekt),
            regex: RegexSafetyConfig::default(),
            cursor_secret: "test-secret".to_string(),
        };
        let router = QueryRouter::from_config(&engine).unwrap();
        let (reindex, rx) = ReindexQueue::channel(reindex_capacity);
        let state = AppState {
            config: AppConfig {
                address: DEFAULT_API_ADDRESS.to_string(),
                reindex_capacity,
                indexer_webhook_url: None,
            },
            health: HealthService::new(router.provider().clone()),
            router: Arc::new(router),
            reindex,
        };
        (Arc::new(state), rx)
    }

    pub(crate) async fn body_json(resp: Response) -> (StatusCode, serde_json::Value) {
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}
