//! Hybrid TeX search core.
//!
//! A [`router::QueryRouter`] takes one [`query::SearchQuery`], gates regular
//! expressions through [`regex_safety`], checks the active provider's
//! capabilities, dispatches to OpenSearch or a Zoekt sidecar, converts the
//! provider's continuation into an opaque [`pagination::PageToken`] and splits
//! each highlighted snippet into math-safe [`snippets::SnippetSegment`]s.

pub mod config;
pub mod error_handler;
pub mod health_service;
pub mod pagination;
pub mod providers;
pub mod query;
pub mod regex_safety;
pub mod router;
pub mod snippets;
pub mod telemetry;

pub use config::{EngineConfig, ProviderKind};
pub use error_handler::{EngineResult, SearchError, ValidationError};
pub use health_service::{HealthService, HealthStatus};
pub use pagination::{PageToken, PaginationKind};
pub use providers::{ProviderCapabilities, ProviderClient, SearchProvider};
pub use query::{RawSearchParams, SearchMode, SearchQuery};
pub use router::{NormalizedHit, QueryRouter, RequestStage, SearchResult};
pub use snippets::{MathSegment, SnippetSegment};
