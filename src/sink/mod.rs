//! Buffered bulk indexing into the monitoring domain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::retry::RetryPolicy;

pub mod opensearch;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected bulk response: {0}")]
    Response(String),
}

/// Result of one bulk request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BulkOutcome {
    pub written: usize,
    /// Items the store rejected individually.
    pub failed: usize,
}

#[async_trait]
pub trait BulkWriter: Send + Sync {
    /// Submits an NDJSON `_bulk` body holding `count` documents.
    async fn bulk(&self, body: String, count: usize) -> Result<BulkOutcome, SinkError>;
}

pub type DynBulkWriter = Arc<dyn BulkWriter>;

/// Target index, optionally suffixed with the UTC day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub timestamped: bool,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>, timestamped: bool) -> Self {
        IndexDescriptor {
            name: name.into(),
            timestamped,
        }
    }

    pub fn index_name(&self, now: DateTime<Utc>) -> String {
        if self.timestamped {
            format!("{}-{}", self.name, now.format("%Y.%m.%d"))
        } else {
            self.name.clone()
        }
    }
}

pub struct SinkBuffer {
    writer: DynBulkWriter,
    index: String,
    flush_trigger: usize,
    retry: RetryPolicy,
    body: String,
    pending: usize,
}

impl SinkBuffer {
    pub fn new(writer: DynBulkWriter, index: String, flush_trigger: usize, retry: RetryPolicy) -> Self {
        SinkBuffer {
            writer,
            index,
            flush_trigger: flush_trigger.max(1),
            retry,
            body: String::new(),
            pending: 0,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Buffers a document and flushes once `flush_trigger` documents are
    /// pending. Returns the flushed and dropped counts of that flush.
    pub async fn add<T: Serialize>(&mut self, doc: &T) -> Result<(usize, usize), SinkError> {
        let line = serde_json::to_string(doc)?;
        self.add_line(line).await
    }

    pub async fn add_line(&mut self, line: String) -> Result<(usize, usize), SinkError> {
        let action = json!({ "index": { "_index": self.index } });
        self.body.push_str(&action.to_string());
        self.body.push('\n');
        self.body.push_str(&line);
        self.body.push('\n');
        self.pending += 1;

        if self.pending >= self.flush_trigger {
            return self.flush().await;
        }
        Ok((0, 0))
    }

    /// Writes whatever is buffered. A no-op when nothing is pending. The
    /// buffer is kept on failure so a later flush can resend it.
    pub async fn flush(&mut self) -> Result<(usize, usize), SinkError> {
        if self.pending == 0 {
            return Ok((0, 0));
        }

        let start = Instant::now();
        let count = self.pending;
        debug!(index = %self.index, documents = count, bytes = self.body.len(), "flushing bulk buffer");
        let outcome = self
            .retry
            .run("bulk", || self.writer.bulk(self.body.clone(), count))
            .await?;

        self.body.clear();
        self.pending = 0;
        info!(
            index = %self.index,
            written = outcome.written,
            failed = outcome.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "bulk request completed"
        );
        Ok((outcome.written, outcome.failed))
    }
}
