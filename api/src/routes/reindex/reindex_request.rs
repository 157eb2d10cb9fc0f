use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::reindex_queue::ReindexSource;

/// Request payload for `POST /api/reindex`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReindexRequest {
    /// `samples` (default) or `arxiv`.
    #[serde(default)]
    pub source: ReindexSource,
    /// Upper bound on documents to ingest.
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Response payload for an accepted reindex request.
#[derive(Debug, Serialize)]
pub struct ReindexResponse {
    pub task_id: Uuid,
    pub status: &'static str,
}
