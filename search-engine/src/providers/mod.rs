//! Backing search providers.
//!
//! Every provider implements [`SearchProvider`] and declares static
//! [`ProviderCapabilities`]. The router branches on capabilities only, never
//! on provider identity. [`ProviderClient`] is the enum facade built from
//! configuration; it dispatches without trait objects.

pub mod lucene_regex;
pub mod opensearch;
pub mod zoekt;

use std::future::Future;

use serde::Serialize;
use tracing::debug;

use crate::{
    config::{EngineConfig, ProviderConfig},
    error_handler::{ConfigError, ProviderError},
    pagination::{Continuation, PaginationKind},
    query::SearchQuery,
};

pub use opensearch::OpenSearchProvider;
pub use zoekt::ZoektProvider;

/// Static, read-only description of what a provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderCapabilities {
    pub supports_regex: bool,
    pub supports_filters: bool,
    pub pagination_kind: PaginationKind,
    /// Whether `total` is an exact count.
    pub exact_totals: bool,
}

/// One provider match, snippet still carrying marker sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHit {
    pub document_id: String,
    pub path: String,
    /// 1-based.
    pub line_number: u32,
    pub raw_snippet: String,
    pub external_url: Option<String>,
}

/// One page as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub hits: Vec<RawHit>,
    pub total: u64,
    /// Provider marked this total as a lower bound.
    pub total_is_approximate: bool,
    /// Where the following page starts; `None` at the end.
    pub next: Option<Continuation>,
    pub took_ms: Option<u64>,
    /// 1-based page number this result corresponds to.
    pub page: u32,
}

/// Capability-tagged provider interface.
pub trait SearchProvider: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Deepest result offset (`from + size`) the provider can serve.
    fn max_result_window(&self) -> Option<u64> {
        None
    }

    /// Runs one page of `query`, resuming at `from`.
    fn execute(
        &self,
        query: &SearchQuery,
        from: &Continuation,
    ) -> impl Future<Output = Result<RawPage, ProviderError>> + Send;
}

/// Concrete provider with enum dispatch.
#[derive(Debug, Clone)]
pub enum ProviderClient {
    OpenSearch(OpenSearchProvider),
    Zoekt(ZoektProvider),
}

impl ProviderClient {
    /// Builds the configured provider with its own HTTP client.
    ///
    /// # Errors
    /// [`ConfigError::HttpClient`] if the HTTP client cannot be built.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, ConfigError> {
        debug!(provider = %cfg.provider.kind(), "initializing search provider");
        let client = match &cfg.provider {
            ProviderConfig::OpenSearch(os) => {
                ProviderClient::OpenSearch(OpenSearchProvider::new(os.clone())?)
            }
            ProviderConfig::Zoekt(z) => ProviderClient::Zoekt(ZoektProvider::new(z.clone())?),
        };
        Ok(client)
    }

    /// Base URL of the active provider.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::OpenSearch(p) => p.endpoint(),
            Self::Zoekt(p) => p.endpoint(),
        }
    }

    /// Cheap liveness probe against the provider.
    pub async fn ping(&self) -> Result<(), ProviderError> {
        match self {
            Self::OpenSearch(p) => p.ping().await,
            Self::Zoekt(p) => p.ping().await,
        }
    }
}

impl SearchProvider for ProviderClient {
    fn name(&self) -> &'static str {
        match self {
            Self::OpenSearch(p) => p.name(),
            Self::Zoekt(p) => p.name(),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        match self {
            Self::OpenSearch(p) => p.capabilities(),
            Self::Zoekt(p) => p.capabilities(),
        }
    }

    fn max_result_window(&self) -> Option<u64> {
        match self {
            Self::OpenSearch(p) => p.max_result_window(),
            Self::Zoekt(p) => p.max_result_window(),
        }
    }

    async fn execute(
        &self,
        query: &SearchQuery,
        from: &Continuation,
    ) -> Result<RawPage, ProviderError> {
        match self {
            Self::OpenSearch(p) => p.execute(query, from).await,
            Self::Zoekt(p) => p.execute(query, from).await,
        }
    }
}

/// Reads the body of a non-2xx response into [`ProviderError::HttpStatus`].
pub(crate) async fn status_error(resp: reqwest::Response, url: &str) -> ProviderError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    ProviderError::HttpStatus {
        status,
        url: url.to_string(),
        snippet: crate::error_handler::make_snippet(&text),
    }
}
