pub mod engine_config;
pub mod provider_kind;

pub use engine_config::{EngineConfig, OpenSearchConfig, ProviderConfig, ZoektConfig};
pub use provider_kind::ProviderKind;
