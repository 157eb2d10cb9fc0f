//! Unified error handling for `search-engine`.
//!
//! The crate exposes one request-level error, [`SearchError`], which always
//! records the [`RequestStage`] it was raised in. Domain-specific causes live
//! in nested enums ([`ValidationError`], [`ProviderError`], [`ConfigError`],
//! [`SnippetError`]). Small helpers for reading environment variables return
//! [`ConfigError`] directly.
//!
//! All messages carry the `[Search]` prefix to simplify attribution in logs.

use thiserror::Error;

use crate::{regex_safety::RegexRejection, router::RequestStage};

/* ------------------------------------------------------------------------- */
/* Request-level error                                                       */
/* ------------------------------------------------------------------------- */

/// Result alias for the router entry points.
pub type EngineResult<T> = std::result::Result<T, SearchError>;

/// Error returned by [`crate::router::QueryRouter::search`].
///
/// Every variant knows the stage of the request state machine that failed,
/// whether the caller may retry, and a stable machine-readable code.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SearchError {
    /// The request can never succeed as written; the caller must change it.
    #[error("[Search] invalid request: {reason}")]
    Validation {
        stage: RequestStage,
        reason: ValidationError,
    },

    /// The pagination token is stale, tampered, or belongs to another query shape.
    #[error("[Search] invalid or stale cursor; restart from the first page")]
    InvalidCursor { stage: RequestStage },

    /// Transient backend failure. The core does not retry on its own.
    #[error("[Search] provider `{provider}` unavailable: {source}")]
    ProviderUnavailable {
        stage: RequestStage,
        provider: &'static str,
        #[source]
        source: ProviderError,
    },

    /// The backend refused the request or answered with something unusable.
    #[error("[Search] provider `{provider}` rejected the request: {source}")]
    ProviderRejected {
        stage: RequestStage,
        provider: &'static str,
        #[source]
        source: ProviderError,
    },

    /// All regex probe workers are busy.
    #[error("[Search] regex validation capacity exhausted, retry later")]
    Overloaded { stage: RequestStage },
}

impl SearchError {
    /// Stage of the request state machine where the error surfaced.
    pub fn stage(&self) -> RequestStage {
        match self {
            Self::Validation { stage, .. }
            | Self::InvalidCursor { stage }
            | Self::ProviderUnavailable { stage, .. }
            | Self::ProviderRejected { stage, .. }
            | Self::Overloaded { stage } => *stage,
        }
    }

    /// Whether repeating the identical request later may succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. } | Self::Overloaded { .. }
        )
    }

    /// Stable error code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { reason, .. } => reason.code(),
            Self::InvalidCursor { .. } => "INVALID_CURSOR",
            Self::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::ProviderRejected { .. } => "PROVIDER_REJECTED",
            Self::Overloaded { .. } => "OVERLOADED",
        }
    }

    pub(crate) fn rejected(reason: ValidationError) -> Self {
        Self::Validation {
            stage: RequestStage::Rejected,
            reason,
        }
    }

    /// Classifies a provider failure into retryable / non-retryable.
    pub(crate) fn from_provider(provider: &'static str, err: ProviderError) -> Self {
        let stage = RequestStage::Failed;
        match err {
            ProviderError::InvalidContinuation(_) => Self::InvalidCursor { stage },
            err if err.is_transient() => Self::ProviderUnavailable {
                stage,
                provider,
                source: err,
            },
            err => Self::ProviderRejected {
                stage,
                provider,
                source: err,
            },
        }
    }
}

/* ------------------------------------------------------------------------- */
/* Validation errors                                                         */
/* ------------------------------------------------------------------------- */

/// Caller-correctable problems detected before any backend call.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("query too long: {len} chars (max {max})")]
    QueryTooLong { len: usize, max: usize },

    #[error("page must be >= 1")]
    InvalidPage,

    #[error("invalid page size {size} (expected 1..={max})")]
    InvalidPageSize { size: u32, max: u32 },

    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("provider `{provider}` does not support regex queries")]
    UnsupportedMode { provider: &'static str },

    #[error("provider `{provider}` does not support filters (got `{key}`)")]
    UnsupportedFilter { provider: &'static str, key: String },

    #[error("requested window ends at result {end}, beyond the provider limit of {max}")]
    WindowTooDeep { end: u64, max: u64 },

    #[error("unsafe regex: {0}")]
    UnsafeRegex(RegexRejection),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyQuery | Self::QueryTooLong { .. } => "INVALID_QUERY",
            Self::InvalidPage | Self::InvalidPageSize { .. } | Self::WindowTooDeep { .. } => {
                "INVALID_PAGINATION"
            }
            Self::UnknownFilter(_) => "UNKNOWN_FILTER",
            Self::UnsupportedMode { .. } => "UNSUPPORTED_MODE",
            Self::UnsupportedFilter { .. } => "UNSUPPORTED_FILTER",
            Self::UnsafeRegex(_) => "UNSAFE_REGEX",
        }
    }
}

/* ------------------------------------------------------------------------- */
/* Provider errors                                                           */
/* ------------------------------------------------------------------------- */

/// Failure talking to (or understanding) a backing search provider.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Request exceeded the provider timeout.
    #[error("request timed out")]
    Timeout,

    /// DNS/connect/reset without an HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream answered with a non-successful HTTP status.
    #[error("HTTP {status} from {url}: {snippet}")]
    HttpStatus {
        status: u16,
        url: String,
        snippet: String,
    },

    /// Response payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The adapter cannot run this query mode.
    #[error("query mode not supported by this provider")]
    UnsupportedMode,

    /// The adapter cannot apply structured filters.
    #[error("filter `{0}` not supported by this provider")]
    UnsupportedFilter(String),

    /// The continuation handed to the adapter is not one it produced.
    #[error("continuation not understood: {0}")]
    InvalidContinuation(String),
}

impl ProviderError {
    /// Transient failures are worth retrying with backoff by the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Timeout;
        }
        if e.is_decode() {
            return ProviderError::Decode(e.to_string());
        }
        if let Some(status) = e.status() {
            return ProviderError::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                snippet: String::new(),
            };
        }
        ProviderError::Network(e.to_string())
    }
}

/// Trims an upstream body to a short, single-line snippet for error messages.
pub fn make_snippet(body: &str) -> String {
    body.chars()
        .take(240)
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/* ------------------------------------------------------------------------- */
/* Snippet errors                                                            */
/* ------------------------------------------------------------------------- */

/// A provider snippet whose match markers cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnippetError {
    #[error("[Search] nested match marker at byte {0}")]
    NestedMarker(usize),

    #[error("[Search] closing match marker without opener at byte {0}")]
    StrayClose(usize),

    #[error("[Search] match marker opened at byte {0} never closes")]
    Unterminated(usize),
}

/* ------------------------------------------------------------------------- */
/* Config errors                                                             */
/* ------------------------------------------------------------------------- */

/// Errors raised while loading configuration from the environment.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("[Search] missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("[Search] invalid number in {var}: {reason}")]
    InvalidNumber {
        var: &'static str,
        reason: &'static str,
    },

    #[error("[Search] invalid boolean in {var}: expected true/false/1/0")]
    InvalidBool { var: &'static str },

    #[error("[Search] unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("[Search] invalid format in {var}: {reason}")]
    InvalidFormat {
        var: &'static str,
        reason: &'static str,
    },

    #[error("[Search] failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/* ------------------------------------------------------------------------- */
/* Env helpers                                                               */
/* ------------------------------------------------------------------------- */

/// Reads an optional, non-empty environment variable.
pub fn env_opt(name: &'static str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Reads a variable or falls back to `default`.
pub fn env_or(name: &'static str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Parses an optional `u64` (`Ok(None)` if unset/empty).
///
/// # Errors
/// [`ConfigError::InvalidNumber`] if the variable is set but not a `u64`.
pub fn env_opt_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    env_opt(name)
        .map(|v| {
            v.parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                var: name,
                reason: "expected unsigned integer",
            })
        })
        .transpose()
}

/// Parses an optional boolean (`true/false/1/0/yes/no`).
pub fn env_opt_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    env_opt(name)
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidBool { var: name }),
        })
        .transpose()
}

/// Validates that an HTTP endpoint starts with `http://` or `https://`.
///
/// # Errors
/// [`ConfigError::InvalidFormat`] when the scheme is missing.
pub fn validate_http_endpoint(var: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidFormat {
            var,
            reason: "must start with http:// or https://",
        })
    }
}
