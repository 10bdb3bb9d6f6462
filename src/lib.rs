use chrono::{Duration, Utc};
use lambda_runtime::{Error, LambdaEvent};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clients::AwsClients;
use crate::config::{Config, ConfigError, Mode};
use crate::events::Trigger;
use crate::metrics::cloudwatch::{CloudWatchSource, ServiceDirectory};
use crate::metrics::MetricsContext;
use crate::sink::opensearch::MonitoringDomain;
use crate::sink::{IndexDescriptor, SinkBuffer};
use crate::snapshot::cluster::SignedClusterReader;
use crate::snapshot::SnapshotContext;
use crate::watermark::DynamoDbWatermarkStore;

pub mod clients;
pub mod config;
pub mod events;
pub mod metrics;
pub mod model;
pub mod retry;
pub mod sink;
pub mod snapshot;
pub mod watermark;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}

// lambda handler
pub async fn function_handler(
    clients: &AwsClients,
    monitoring: MonitoringDomain,
    config: &Config,
    evt: LambdaEvent<Trigger>,
) -> Result<(), Error> {
    info!(trigger = evt.payload.kind(), mode = %config.mode, "Handling lambda invocation");
    debug!("Handling event payload: {:?}", evt.payload);

    match config.mode {
        Mode::Metrics => collect_metrics(clients, monitoring, config).await,
        Mode::Snapshot => snapshot_domains(clients, monitoring, config).await,
    }
}

async fn collect_metrics(
    clients: &AwsClients,
    monitoring: MonitoringDomain,
    config: &Config,
) -> Result<(), Error> {
    let table = config.table.clone().ok_or(ConfigError::Missing("TABLE"))?;
    let store = DynamoDbWatermarkStore::new(clients.dynamodb.clone(), table);
    let directory = ServiceDirectory::new(clients.clone());
    let source = CloudWatchSource::new(clients.clone());

    let now = Utc::now();
    let ctx = MetricsContext {
        directory: &directory,
        source: &source,
        store: &store,
        retry: config.retry_policy(),
        period: config.metric_period,
        lookback: Duration::minutes(config.lookback_minutes),
    };
    let mut sink = SinkBuffer::new(
        Arc::new(monitoring),
        IndexDescriptor::new(config.metrics_index.clone(), true).index_name(now),
        config.flush_trigger,
        config.retry_policy(),
    );

    let summary = metrics::run(&ctx, &config.regions, &mut sink, now).await?;
    if summary.domains_failed > 0 {
        warn!(
            domains_failed = summary.domains_failed,
            domains = summary.domains,
            "some domains were not collected; their watermarks were left in place"
        );
    }
    Ok(())
}

async fn snapshot_domains(
    clients: &AwsClients,
    monitoring: MonitoringDomain,
    config: &Config,
) -> Result<(), Error> {
    let credentials = clients
        .sdk_config()
        .credentials_provider()
        .ok_or("no AWS credentials provider configured")?;
    let reader = SignedClusterReader::new(credentials)?;
    let directory = ServiceDirectory::new(clients.clone());

    let ctx = SnapshotContext {
        directory: &directory,
        reader: &reader,
        monitoring: &monitoring,
        writer: Arc::new(monitoring.clone()),
        retry: config.retry_policy(),
        flush_trigger: config.flush_trigger,
    };
    let summary = snapshot::run(&ctx, &config.regions, Utc::now()).await?;
    if summary.domains_failed > 0 {
        warn!(
            domains_failed = summary.domains_failed,
            domains = summary.domains,
            "some domains are missing from today's snapshot"
        );
    }
    Ok(())
}
