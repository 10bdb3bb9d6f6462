use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::model::{MetricDescriptor, ResourceRef};
use crate::retry::RetryPolicy;
use crate::sink::{SinkBuffer, SinkError};
use crate::watermark::WatermarkStore;

pub mod batcher;
pub mod cloudwatch;
pub mod collector;

use batcher::MetricQuery;
use collector::Collector;

/// CloudWatch namespace of the OpenSearch Service metrics.
pub const NAMESPACE: &str = "AWS/ES";
pub const DOMAIN_DIMENSION: &str = "DomainName";

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("{operation} failed in {region}: {reason}")]
    Api {
        operation: &'static str,
        region: String,
        reason: String,
    },
    #[error("no client configured for region {0}")]
    UnknownRegion(String),
}

/// Points returned for one query id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesData {
    pub id: String,
    /// Seconds since the epoch; sub-second precision is already dropped.
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}

#[async_trait]
pub trait DomainDirectory: Send + Sync {
    async fn list_domain_names(&self, region: &str) -> Result<Vec<String>, SourceError>;
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn list_metrics(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<MetricDescriptor>, SourceError>;

    /// Runs one batch of at most 100 queries over `[start, end)`, following
    /// pagination until exhausted.
    async fn get_metric_data(
        &self,
        region: &str,
        queries: &[MetricQuery],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesData>, SourceError>;
}

/// Everything one collection run needs, built per invocation.
pub struct MetricsContext<'a> {
    pub directory: &'a dyn DomainDirectory,
    pub source: &'a dyn MetricSource,
    pub store: &'a dyn WatermarkStore,
    pub retry: RetryPolicy,
    pub period: i32,
    pub lookback: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub domains: usize,
    pub domains_failed: usize,
    pub values: usize,
    pub flushed: usize,
    pub dropped: usize,
}

/// Lists the domains of every region in order. A region that cannot be
/// listed is skipped.
pub async fn list_all_domains(
    directory: &dyn DomainDirectory,
    retry: RetryPolicy,
    regions: &[String],
) -> Vec<ResourceRef> {
    let mut domains = Vec::new();
    for region in regions {
        let listed = retry
            .run("list_domain_names", || directory.list_domain_names(region))
            .await;
        match listed {
            Ok(names) => {
                info!(region = %region, count = names.len(), "listed domains");
                domains.extend(names.into_iter().map(|name| ResourceRef::new(region, name)));
            }
            Err(e) => error!(region = %region, error = %e, "failed to get domain names"),
        }
    }
    domains
}

pub async fn run(
    ctx: &MetricsContext<'_>,
    regions: &[String],
    sink: &mut SinkBuffer,
    now: DateTime<Utc>,
) -> Result<RunSummary, SinkError> {
    let start = Instant::now();
    let mut summary = RunSummary::default();
    let collector = Collector::new(ctx.source, ctx.store, ctx.period, ctx.lookback);

    for resource in list_all_domains(ctx.directory, ctx.retry, regions).await {
        summary.domains += 1;
        let descriptors = match ctx
            .retry
            .run("list_metrics", || ctx.source.list_metrics(&resource))
            .await
        {
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!(domain = %resource.resource_id, region = %resource.region, error = %e, "failed to list metrics");
                summary.domains_failed += 1;
                continue;
            }
        };
        info!(
            domain = %resource.resource_id,
            region = %resource.region,
            metrics = descriptors.len(),
            "discovered metrics"
        );

        let outcome = collector.collect(&resource, &descriptors, now).await;
        if outcome.failed {
            summary.domains_failed += 1;
        }
        summary.values += outcome.values.len();

        for value in &outcome.values {
            let (flushed, dropped) = sink.add(value).await?;
            summary.flushed += flushed;
            summary.dropped += dropped;
        }
    }

    let (flushed, dropped) = sink.flush().await?;
    summary.flushed += flushed;
    summary.dropped += dropped;

    if summary.dropped > 0 {
        warn!(dropped = summary.dropped, "documents rejected by bulk indexing");
    }
    info!(
        domains = summary.domains,
        domains_failed = summary.domains_failed,
        values = summary.values,
        flushed = summary.flushed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "metrics collection completed"
    );
    Ok(summary)
}
