use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::error_handler::ConfigError;

/// Backing search provider selected at startup (`SEARCH_PROVIDER`).
///
/// ```
/// use search_engine::config::provider_kind::ProviderKind;
///
/// let kind: ProviderKind = "zoekt".parse().unwrap();
/// assert_eq!(kind, ProviderKind::Zoekt);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Full-text engine: literal + regex, filters, page numbers, exact totals.
    #[default]
    OpenSearch,
    /// Literal substring sidecar: no regex, no filters, cursors.
    Zoekt,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenSearch => "opensearch",
            ProviderKind::Zoekt => "zoekt",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opensearch" | "os" => Ok(ProviderKind::OpenSearch),
            "zoekt" => Ok(ProviderKind::Zoekt),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}
