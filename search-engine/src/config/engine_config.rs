//! Engine configuration loaded from environment variables.
//!
//! # Environment variables
//!
//! Provider selection:
//! - `SEARCH_PROVIDER`        = `opensearch` (default) or `zoekt`
//! - `PROVIDER_TIMEOUT_MS`    = per-request provider timeout (default 2000)
//! - `SNIPPET_LINES`          = context lines around a match (default 8)
//!
//! OpenSearch:
//! - `OPENSEARCH_HOST`        = base URL (default `http://opensearch:9200`)
//! - `OPENSEARCH_INDEX`       = index name (default `tex`)
//! - `OPENSEARCH_USER` / `OPENSEARCH_PASSWORD` = optional basic auth
//! - `OPENSEARCH_INSECURE_TLS` = accept invalid certificates (default true)
//!
//! Zoekt:
//! - `ZOEKT_URL`              = sidecar base URL (default `http://zoekt:6070`)
//! - `ZOEKT_FETCH_CONTENT`    = fetch whole files for snippets (default true)
//!
//! Regex gate and pagination:
//! - `REGEX_MAX_LEN`, `REGEX_PROBE_BUDGET_MS`, `REGEX_PROBE_WORKERS`, `REGEX_PROBE_LEN`
//! - `CURSOR_SECRET`          = key material for cursor integrity tags

use std::time::Duration;

use tracing::warn;

use crate::{
    config::provider_kind::ProviderKind,
    error_handler::{
        ConfigError, env_opt, env_opt_bool, env_opt_u64, env_or, validate_http_endpoint,
    },
    regex_safety::RegexSafetyConfig,
    snippets::DEFAULT_CONTEXT_LINES,
};

pub const DEFAULT_OPENSEARCH_HOST: &str = "http://opensearch:9200";
pub const DEFAULT_OPENSEARCH_INDEX: &str = "tex";
pub const DEFAULT_ZOEKT_URL: &str = "http://zoekt:6070";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_millis(2000);

/// Used when `CURSOR_SECRET` is unset. Tokens then survive restarts but are
/// forgeable by anyone who reads this source.
const FALLBACK_CURSOR_SECRET: &str = "texgrep-dev-cursor-secret";

#[derive(Debug, Clone)]
pub struct OpenSearchConfig {
    pub host: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub insecure_tls: bool,
    pub timeout: Duration,
    pub snippet_lines: usize,
}

impl OpenSearchConfig {
    /// Local defaults, handy for tests.
    pub fn new(host: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            index: index.into(),
            username: None,
            password: None,
            insecure_tls: false,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            snippet_lines: DEFAULT_CONTEXT_LINES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoektConfig {
    pub url: String,
    pub timeout: Duration,
    pub context_lines: usize,
    /// Load `/api/file` when a match comes without document content.
    pub fetch_content: bool,
}

impl ZoektConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            context_lines: DEFAULT_CONTEXT_LINES,
            fetch_content: true,
        }
    }
}

/// Settings for the single active provider.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenSearch(OpenSearchConfig),
    Zoekt(ZoektConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::OpenSearch(_) => ProviderKind::OpenSearch,
            ProviderConfig::Zoekt(_) => ProviderKind::Zoekt,
        }
    }
}

/// Everything [`crate::router::QueryRouter`] needs at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub provider: ProviderConfig,
    pub regex: RegexSafetyConfig,
    pub cursor_secret: String,
}

impl EngineConfig {
    /// Reads and validates the engine configuration.
    ///
    /// # Errors
    /// [`ConfigError`] for unknown providers, malformed numbers/booleans and
    /// endpoints without an `http(s)://` scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        let kind: ProviderKind = env_or("SEARCH_PROVIDER", "opensearch").parse()?;
        let timeout = env_opt_u64("PROVIDER_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
        let snippet_lines = env_usize("SNIPPET_LINES")?.unwrap_or(DEFAULT_CONTEXT_LINES);

        let provider = match kind {
            ProviderKind::OpenSearch => {
                let host = env_or("OPENSEARCH_HOST", DEFAULT_OPENSEARCH_HOST);
                validate_http_endpoint("OPENSEARCH_HOST", &host)?;
                ProviderConfig::OpenSearch(OpenSearchConfig {
                    host,
                    index: env_or("OPENSEARCH_INDEX", DEFAULT_OPENSEARCH_INDEX),
                    username: env_opt("OPENSEARCH_USER"),
                    password: env_opt("OPENSEARCH_PASSWORD"),
                    insecure_tls: env_opt_bool("OPENSEARCH_INSECURE_TLS")?.unwrap_or(true),
                    timeout,
                    snippet_lines,
                })
            }
            ProviderKind::Zoekt => {
                let url = env_or("ZOEKT_URL", DEFAULT_ZOEKT_URL);
                validate_http_endpoint("ZOEKT_URL", &url)?;
                ProviderConfig::Zoekt(ZoektConfig {
                    url,
                    timeout,
                    context_lines: snippet_lines,
                    fetch_content: env_opt_bool("ZOEKT_FETCH_CONTENT")?.unwrap_or(true),
                })
            }
        };

        let defaults = RegexSafetyConfig::default();
        let regex = RegexSafetyConfig {
            max_len: env_usize("REGEX_MAX_LEN")?.unwrap_or(defaults.max_len),
            probe_budget: env_opt_u64("REGEX_PROBE_BUDGET_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_budget),
            probe_len: env_usize("REGEX_PROBE_LEN")?.unwrap_or(defaults.probe_len),
            max_workers: env_usize("REGEX_PROBE_WORKERS")?.unwrap_or(defaults.max_workers),
        };
        if regex.max_workers == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "REGEX_PROBE_WORKERS",
                reason: "must be at least 1",
            });
        }

        let cursor_secret = env_opt("CURSOR_SECRET").unwrap_or_else(|| {
            warn!("CURSOR_SECRET is not set; using the built-in development secret");
            FALLBACK_CURSOR_SECRET.to_string()
        });

        Ok(Self {
            provider,
            regex,
            cursor_secret,
        })
    }
}

fn env_usize(name: &'static str) -> Result<Option<usize>, ConfigError> {
    env_opt_u64(name)?
        .map(|v| {
            usize::try_from(v).map_err(|_| ConfigError::InvalidNumber {
                var: name,
                reason: "value does not fit in usize",
            })
        })
        .transpose()
}
