//! Query router: the request state machine.
//!
//! ```text
//! Received ─► Validated ─► Dispatched ─► Normalized ─► Completed
//!    │                         │
//!    └─► Rejected              └─► Failed
//! ```
//!
//! Everything that can refuse a request (capabilities, cursor decoding, the
//! provider result window, the regex gate) runs before the provider is
//! called. Provider failures are classified, never retried. A hit whose
//! snippet cannot be decomposed is degraded to plain text on its own.

use std::{fmt, time::Instant};

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{
    config::EngineConfig,
    error_handler::{ConfigError, EngineResult, SearchError, ValidationError},
    pagination::{Continuation, PageToken, PaginationCoordinator},
    providers::{ProviderCapabilities, ProviderClient, RawHit, SearchProvider},
    query::{SearchMode, SearchQuery},
    regex_safety::{RegexRejection, RegexSafetyValidator},
    snippets::{SnippetSegment, decompose, degrade},
};

/// State of a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStage {
    Received,
    Validated,
    Dispatched,
    Normalized,
    Completed,
    Rejected,
    Failed,
}

impl RequestStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Dispatched => "dispatched",
            Self::Normalized => "normalized",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hit after snippet decomposition. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedHit {
    pub document_id: String,
    pub path: String,
    pub line_number: u32,
    pub snippet: Vec<SnippetSegment>,
    pub external_url: Option<String>,
    /// Snippet markers were malformed and have been dropped.
    pub degraded: bool,
}

/// Provider-independent page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub hits: Vec<NormalizedHit>,
    pub total: u64,
    pub total_is_approximate: bool,
    pub page: u32,
    pub size: u32,
    /// `None` signals the end of results.
    pub next_token: Option<PageToken>,
    pub provider_latency_ms: u64,
    pub end_to_end_latency_ms: u64,
    pub degraded_hits: usize,
}

/// Orchestrates validation, dispatch and normalization for one provider.
pub struct QueryRouter<P = ProviderClient> {
    provider: P,
    validator: RegexSafetyValidator,
    pagination: PaginationCoordinator,
}

impl QueryRouter<ProviderClient> {
    /// Builds the configured provider, regex gate and pagination coordinator.
    ///
    /// # Errors
    /// [`ConfigError`] if the provider HTTP client cannot be built.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            ProviderClient::from_config(cfg)?,
            RegexSafetyValidator::new(cfg.regex.clone()),
            PaginationCoordinator::new(&cfg.cursor_secret),
        ))
    }
}

impl<P: SearchProvider> QueryRouter<P> {
    pub fn new(
        provider: P,
        validator: RegexSafetyValidator,
        pagination: PaginationCoordinator,
    ) -> Self {
        Self {
            provider,
            validator,
            pagination,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.provider.capabilities()
    }

    /// Runs one search request through the state machine.
    ///
    /// # Errors
    /// - [`SearchError::Validation`] / [`SearchError::InvalidCursor`] /
    ///   [`SearchError::Overloaded`] from the `Rejected` stage; the provider is
    ///   never called in that case
    /// - [`SearchError::ProviderUnavailable`] / [`SearchError::ProviderRejected`]
    ///   from the `Failed` stage
    #[instrument(skip_all, fields(provider = self.provider.name(), mode = query.mode.as_str(), size = query.page_size))]
    pub async fn search(&self, query: SearchQuery) -> EngineResult<SearchResult> {
        let started = Instant::now();
        let name = self.provider.name();
        let caps = self.provider.capabilities();
        self.enter(RequestStage::Received);

        let from = match self.validate(&query, caps).await {
            Ok(from) => from,
            Err(err) => {
                self.enter(RequestStage::Rejected);
                debug!(code = err.code(), %err, "request rejected");
                return Err(err);
            }
        };
        self.enter(RequestStage::Validated);

        self.enter(RequestStage::Dispatched);
        let dispatched = Instant::now();
        let raw = match self.provider.execute(&query, &from).await {
            Ok(raw) => raw,
            Err(err) => {
                self.enter(RequestStage::Failed);
                warn!(provider = name, transient = err.is_transient(), %err, "provider call failed");
                return Err(SearchError::from_provider(name, err));
            }
        };
        let provider_latency_ms = raw
            .took_ms
            .unwrap_or_else(|| dispatched.elapsed().as_millis() as u64);

        let mut degraded_hits = 0;
        let hits: Vec<NormalizedHit> = raw
            .hits
            .into_iter()
            .map(|hit| {
                let normalized = self.normalize(hit);
                degraded_hits += usize::from(normalized.degraded);
                normalized
            })
            .collect();
        let next_token = raw
            .next
            .as_ref()
            .map(|next| self.pagination.encode(caps.pagination_kind, next, query.page_size));
        self.enter(RequestStage::Normalized);

        let result = SearchResult {
            hits,
            total: raw.total,
            total_is_approximate: raw.total_is_approximate || !caps.exact_totals,
            page: raw.page,
            size: query.page_size,
            next_token,
            provider_latency_ms,
            end_to_end_latency_ms: started.elapsed().as_millis() as u64,
            degraded_hits,
        };
        self.enter(RequestStage::Completed);
        debug!(
            hits = result.hits.len(),
            total = result.total,
            degraded = result.degraded_hits,
            has_next = result.next_token.is_some(),
            "search completed"
        );
        Ok(result)
    }

    fn enter(&self, stage: RequestStage) {
        debug!(provider = self.provider.name(), stage = stage.as_str(), "search stage");
    }

    /// All checks that must pass before any network call.
    async fn validate(
        &self,
        query: &SearchQuery,
        caps: ProviderCapabilities,
    ) -> EngineResult<Continuation> {
        let name = self.provider.name();

        if query.mode == SearchMode::Regex && !caps.supports_regex {
            return Err(SearchError::rejected(ValidationError::UnsupportedMode {
                provider: name,
            }));
        }
        if !caps.supports_filters {
            if let Some(key) = query.filters.keys().next() {
                return Err(SearchError::rejected(ValidationError::UnsupportedFilter {
                    provider: name,
                    key: key.clone(),
                }));
            }
        }

        let from = match (&query.cursor, query.page) {
            (Some(token), _) => self
                .pagination
                .decode(token, caps.pagination_kind, query.page_size)
                .map_err(|_| SearchError::InvalidCursor {
                    stage: RequestStage::Rejected,
                })?,
            (None, Some(page)) => Continuation::Page(page),
            (None, None) => Continuation::first(caps.pagination_kind),
        };

        if let (Some(max), Continuation::Page(page)) = (self.provider.max_result_window(), &from) {
            let end = u64::from(*page) * u64::from(query.page_size);
            if end > max {
                return Err(SearchError::rejected(ValidationError::WindowTooDeep {
                    end,
                    max,
                }));
            }
        }

        if query.mode == SearchMode::Regex {
            self.validator
                .validate(&query.text)
                .await
                .map_err(|rejection| match rejection {
                    RegexRejection::ProbeSaturated => SearchError::Overloaded {
                        stage: RequestStage::Rejected,
                    },
                    other => SearchError::rejected(ValidationError::UnsafeRegex(other)),
                })?;
        }

        Ok(from)
    }

    fn normalize(&self, hit: RawHit) -> NormalizedHit {
        let (snippet, degraded) = match decompose(&hit.raw_snippet) {
            Ok(segments) => (segments, false),
            Err(err) => {
                warn!(
                    provider = self.provider.name(),
                    document_id = %hit.document_id,
                    %err,
                    "malformed snippet; degrading hit to plain text"
                );
                (degrade(&hit.raw_snippet), true)
            }
        };
        NormalizedHit {
            document_id: hit.document_id,
            path: hit.path,
            line_number: hit.line_number,
            snippet,
            external_url: hit.external_url,
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        error_handler::ProviderError,
        pagination::PaginationKind,
        providers::RawPage,
        regex_safety::RegexSafetyConfig,
        snippets::{MARK_OPEN, mark},
    };

    /// In-memory provider over `total` numbered matches.
    struct CountingProvider {
        caps: ProviderCapabilities,
        total: u64,
        calls: AtomicUsize,
        malformed_at: Option<u64>,
        fail_with: Option<u16>,
    }

    impl CountingProvider {
        fn new(caps: ProviderCapabilities, total: u64) -> Self {
            Self {
                caps,
                total,
                calls: AtomicUsize::new(0),
                malformed_at: None,
                fail_with: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SearchProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            self.caps
        }

        fn max_result_window(&self) -> Option<u64> {
            Some(1_000)
        }

        async fn execute(
            &self,
            query: &SearchQuery,
            from: &Continuation,
        ) -> Result<RawPage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.fail_with {
                return Err(ProviderError::HttpStatus {
                    status,
                    url: "http://fake".into(),
                    snippet: String::new(),
                });
            }

            let size = u64::from(query.page_size);
            let offset = match from {
                Continuation::Page(p) => u64::from(p - 1) * size,
                Continuation::Cursor(c) if c.is_empty() => 0,
                Continuation::Cursor(c) => c
                    .parse()
                    .map_err(|_| ProviderError::InvalidContinuation(c.clone()))?,
            };
            let end = (offset + size).min(self.total);
            let hits = (offset..end)
                .map(|n| RawHit {
                    document_id: format!("doc-{n}"),
                    path: format!("{n}.tex"),
                    line_number: 1,
                    raw_snippet: if Some(n) == self.malformed_at {
                        format!("broken {MARK_OPEN}$x$")
                    } else {
                        format!("match {} in $x_{n}$", mark(&n.to_string()))
                    },
                    external_url: None,
                })
                .collect();
            let next = (end < self.total).then(|| match self.caps.pagination_kind {
                PaginationKind::PageNumber => Continuation::Page((end / size) as u32 + 1),
                PaginationKind::Cursor => Continuation::Cursor(end.to_string()),
            });
            Ok(RawPage {
                hits,
                total: self.total,
                total_is_approximate: false,
                next,
                took_ms: Some(1),
                page: (offset / size) as u32 + 1,
            })
        }
    }

    fn sidecar_caps() -> ProviderCapabilities {
        ProviderCapabilities {
            supports_regex: false,
            supports_filters: false,
            pagination_kind: PaginationKind::Cursor,
            exact_totals: false,
        }
    }

    fn engine_caps() -> ProviderCapabilities {
        ProviderCapabilities {
            supports_regex: true,
            supports_filters: true,
            pagination_kind: PaginationKind::PageNumber,
            exact_totals: true,
        }
    }

    fn router(provider: CountingProvider) -> QueryRouter<CountingProvider> {
        QueryRouter::new(
            provider,
            RegexSafetyValidator::new(RegexSafetyConfig {
                probe_budget: std::time::Duration::from_millis(500),
                ..RegexSafetyConfig::default()
            }),
            PaginationCoordinator::new("router-tests"),
        )
    }

    async fn collect_pages(r: &QueryRouter<CountingProvider>, size: u32) -> Vec<SearchResult> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut q = SearchQuery::literal("needle", size);
            q.cursor = cursor.take();
            let page = r.search(q).await.unwrap();
            cursor = page.next_token.as_ref().map(|t| t.as_str().to_string());
            pages.push(page);
            if cursor.is_none() {
                return pages;
            }
        }
    }

    #[tokio::test]
    async fn regex_against_literal_provider_never_dispatches() {
        let r = router(CountingProvider::new(sidecar_caps(), 10));
        let err = r.search(SearchQuery::regex("a+b", 20)).await.unwrap_err();
        assert!(matches!(
            err,
            SearchError::Validation {
                reason: ValidationError::UnsupportedMode { .. },
                ..
            }
        ));
        assert_eq!(err.stage(), RequestStage::Rejected);
        assert!(!err.retryable());
        assert_eq!(r.provider().calls(), 0);
    }

    #[tokio::test]
    async fn filters_against_unfiltered_provider_never_dispatch() {
        let r = router(CountingProvider::new(sidecar_caps(), 10));
        let mut q = SearchQuery::literal("x", 20);
        q.filters.insert("source".into(), "arxiv".into());
        let err = r.search(q).await.unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_FILTER");
        assert_eq!(r.provider().calls(), 0);
    }

    #[tokio::test]
    async fn unsafe_regex_is_rejected_before_dispatch() {
        let r = router(CountingProvider::new(engine_caps(), 10));
        let err = r.search(SearchQuery::regex("^(a+)+$", 20)).await.unwrap_err();
        assert!(matches!(
            err,
            SearchError::Validation {
                reason: ValidationError::UnsafeRegex(RegexRejection::CatastrophicBacktrackRisk(_)),
                ..
            }
        ));
        assert_eq!(r.provider().calls(), 0);
    }

    #[tokio::test]
    async fn cursor_pagination_partitions_45_matches_as_20_20_5() {
        let r = router(CountingProvider::new(sidecar_caps(), 45));
        let pages = collect_pages(&r, 20).await;

        let sizes: Vec<usize> = pages.iter().map(|p| p.hits.len()).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
        assert_eq!(pages.iter().map(|p| p.page).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(pages[2].next_token.is_none());
        assert!(pages.iter().all(|p| p.total_is_approximate));

        let ids: HashSet<&str> = pages
            .iter()
            .flat_map(|p| p.hits.iter().map(|h| h.document_id.as_str()))
            .collect();
        assert_eq!(ids.len(), 45);
        assert_eq!(r.provider().calls(), 3);
    }

    #[tokio::test]
    async fn page_number_pagination_partitions_45_matches_as_20_20_5() {
        let r = router(CountingProvider::new(engine_caps(), 45));
        let pages = collect_pages(&r, 20).await;
        let sizes: Vec<usize> = pages.iter().map(|p| p.hits.len()).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
        assert!(!pages[0].total_is_approximate);

        let ids: HashSet<&str> = pages
            .iter()
            .flat_map(|p| p.hits.iter().map(|h| h.document_id.as_str()))
            .collect();
        assert_eq!(ids.len(), 45);
    }

    #[tokio::test]
    async fn resized_cursor_is_invalid() {
        let r = router(CountingProvider::new(sidecar_caps(), 45));
        let first = r.search(SearchQuery::literal("n", 20)).await.unwrap();
        let token = first.next_token.unwrap();

        let mut q = SearchQuery::literal("n", 10);
        q.cursor = Some(token.into_string());
        let err = r.search(q).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidCursor { .. }));
        assert_eq!(err.stage(), RequestStage::Rejected);
        assert_eq!(r.provider().calls(), 1);
    }

    #[tokio::test]
    async fn malformed_snippet_degrades_only_its_hit() {
        let mut provider = CountingProvider::new(engine_caps(), 3);
        provider.malformed_at = Some(1);
        let r = router(provider);

        let page = r.search(SearchQuery::literal("n", 20)).await.unwrap();
        assert_eq!(page.hits.len(), 3);
        assert_eq!(page.degraded_hits, 1);
        assert!(page.hits[1].degraded);
        assert_eq!(
            page.hits[1].snippet,
            vec![SnippetSegment::PlainUnmarked("broken $x$".into())]
        );
        assert!(!page.hits[0].degraded);
        assert!(page.hits[0].snippet.iter().any(SnippetSegment::is_marked));
    }

    #[tokio::test]
    async fn transient_provider_failure_is_retryable() {
        let mut provider = CountingProvider::new(engine_caps(), 3);
        provider.fail_with = Some(503);
        let r = router(provider);

        let err = r.search(SearchQuery::literal("n", 20)).await.unwrap_err();
        assert!(matches!(err, SearchError::ProviderUnavailable { .. }));
        assert!(err.retryable());
        assert_eq!(err.stage(), RequestStage::Failed);
        assert_eq!(r.provider().calls(), 1);
    }

    #[tokio::test]
    async fn bad_request_from_provider_is_not_retryable() {
        let mut provider = CountingProvider::new(engine_caps(), 3);
        provider.fail_with = Some(400);
        let r = router(provider);

        let err = r.search(SearchQuery::literal("n", 20)).await.unwrap_err();
        assert!(matches!(err, SearchError::ProviderRejected { .. }));
        assert!(!err.retryable());
    }

    #[tokio::test]
    async fn deep_pages_are_refused_before_dispatch() {
        let r = router(CountingProvider::new(engine_caps(), 5_000));
        let mut q = SearchQuery::literal("n", 100);
        q.page = Some(11);
        let err = r.search(q).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PAGINATION");
        assert_eq!(r.provider().calls(), 0);
    }
}
