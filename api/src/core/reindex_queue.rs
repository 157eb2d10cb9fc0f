//! Bounded in-process queue for reindex requests.
//!
//! The HTTP handler only enqueues. A single forwarder task drains the queue
//! and posts each job to the external indexer webhook, or logs and drops it
//! when no webhook is configured.

use std::time::Duration;

use search_engine::error_handler::{ConfigError, make_snippet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_REINDEX_QUEUE_CAPACITY: usize = 64;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Corpus the indexer should rebuild from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexSource {
    #[default]
    Samples,
    Arxiv,
}

impl ReindexSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Samples => "samples",
            Self::Arxiv => "arxiv",
        }
    }
}

/// Payload posted to the indexer webhook.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexJob {
    pub task_id: Uuid,
    pub source: ReindexSource,
    pub limit: Option<u32>,
    /// RFC3339 UTC.
    pub queued_at: String,
}

impl ReindexJob {
    pub fn new(source: ReindexSource, limit: Option<u32>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            source,
            limit,
            queued_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("reindex queue is full")]
    Full,
    #[error("reindex forwarder is not running")]
    Closed,
}

/// Cloneable producer side of the queue.
#[derive(Debug, Clone)]
pub struct ReindexQueue {
    tx: mpsc::Sender<ReindexJob>,
}

impl ReindexQueue {
    /// Creates the queue and spawns its forwarder on the current runtime.
    ///
    /// # Errors
    /// [`ConfigError::HttpClient`] if the webhook HTTP client cannot be built.
    pub fn spawn(capacity: usize, webhook_url: Option<String>) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        let (queue, rx) = Self::channel(capacity);
        tokio::spawn(forward(rx, webhook_url, client));
        Ok(queue)
    }

    /// Queue without a forwarder; the caller owns the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReindexJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues without waiting. A full queue is reported, never awaited.
    pub fn enqueue(&self, job: ReindexJob) -> Result<(), EnqueueError> {
        self.tx.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

async fn forward(
    mut rx: mpsc::Receiver<ReindexJob>,
    webhook_url: Option<String>,
    client: reqwest::Client,
) {
    debug!(webhook = webhook_url.as_deref().unwrap_or("-"), "reindex forwarder started");
    while let Some(job) = rx.recv().await {
        let Some(url) = webhook_url.as_deref() else {
            info!(
                task_id = %job.task_id,
                source = job.source.as_str(),
                limit = ?job.limit,
                "INDEXER_WEBHOOK_URL not set; reindex job dropped"
            );
            continue;
        };

        debug!(task_id = %job.task_id, "POST {}", url);
        match client.post(url).json(&job).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(task_id = %job.task_id, source = job.source.as_str(), "reindex job forwarded");
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                warn!(
                    task_id = %job.task_id,
                    %status,
                    snippet = %make_snippet(&text),
                    "indexer webhook rejected reindex job"
                );
            }
            Err(err) => {
                error!(task_id = %job.task_id, error = %err, "failed to reach indexer webhook");
            }
        }
    }
    debug!("reindex forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_is_reported() {
        let (queue, mut rx) = ReindexQueue::channel(1);

        assert_eq!(queue.enqueue(ReindexJob::new(ReindexSource::Samples, None)), Ok(()));
        assert_eq!(
            queue.enqueue(ReindexJob::new(ReindexSource::Arxiv, Some(5))),
            Err(EnqueueError::Full)
        );

        let job = rx.recv().await.unwrap();
        assert_eq!(job.source, ReindexSource::Samples);
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (queue, rx) = ReindexQueue::channel(4);
        drop(rx);
        assert_eq!(
            queue.enqueue(ReindexJob::new(ReindexSource::Samples, None)),
            Err(EnqueueError::Closed)
        );
    }

    #[test]
    fn job_serializes_lowercase_source() {
        let job = ReindexJob::new(ReindexSource::Arxiv, Some(10));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["source"], "arxiv");
        assert_eq!(value["limit"], 10);
        assert_eq!(value["task_id"], job.task_id.to_string());
    }
}
