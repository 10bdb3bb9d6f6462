//! CloudWatch and OpenSearch Service backed discovery and retrieval.

use async_trait::async_trait;
use aws_sdk_cloudwatch::types::{Dimension, DimensionFilter, Metric, MetricDataQuery, MetricStat};
use aws_smithy_types::DateTime as SmithyDateTime;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::batcher::MetricQuery;
use super::{DomainDirectory, MetricSource, SeriesData, SourceError, DOMAIN_DIMENSION, NAMESPACE};
use crate::clients::AwsClients;
use crate::model::{MetricDescriptor, ResourceRef};

/// Lists domains through the OpenSearch Service control plane.
pub struct ServiceDirectory {
    clients: AwsClients,
}

impl ServiceDirectory {
    pub fn new(clients: AwsClients) -> Self {
        ServiceDirectory { clients }
    }
}

#[async_trait]
impl DomainDirectory for ServiceDirectory {
    async fn list_domain_names(&self, region: &str) -> Result<Vec<String>, SourceError> {
        let response = self
            .clients
            .opensearch(region)
            .ok_or_else(|| SourceError::UnknownRegion(region.to_string()))?
            .list_domain_names()
            .send()
            .await
            .map_err(|e| SourceError::Api {
                operation: "ListDomainNames",
                region: region.to_string(),
                reason: e.into_service_error().to_string(),
            })?;

        Ok(response
            .domain_names()
            .iter()
            .filter_map(|info| info.domain_name().map(str::to_string))
            .collect())
    }
}

pub struct CloudWatchSource {
    clients: AwsClients,
}

impl CloudWatchSource {
    pub fn new(clients: AwsClients) -> Self {
        CloudWatchSource { clients }
    }
}

fn to_smithy(ts: DateTime<Utc>) -> SmithyDateTime {
    SmithyDateTime::from_secs(ts.timestamp())
}

fn to_data_query(query: &MetricQuery) -> MetricDataQuery {
    let dimensions = query
        .dimensions
        .iter()
        .map(|(name, value)| Dimension::builder().name(name).value(value).build())
        .collect();

    let metric = Metric::builder()
        .namespace(NAMESPACE)
        .metric_name(&query.key.metric_name)
        .set_dimensions(Some(dimensions))
        .build();

    let stat = MetricStat::builder()
        .metric(metric)
        .period(query.period)
        .stat(query.key.stat.as_str())
        .build();

    MetricDataQuery::builder()
        .id(&query.id)
        .label(&query.label)
        .metric_stat(stat)
        .return_data(true)
        .build()
}

#[async_trait]
impl MetricSource for CloudWatchSource {
    async fn list_metrics(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<MetricDescriptor>, SourceError> {
        let filter = DimensionFilter::builder()
            .name(DOMAIN_DIMENSION)
            .value(&resource.resource_id)
            .build();

        let mut pages = self
            .clients
            .cloudwatch(&resource.region)
            .ok_or_else(|| SourceError::UnknownRegion(resource.region.clone()))?
            .list_metrics()
            .namespace(NAMESPACE)
            .dimensions(filter)
            .into_paginator()
            .send();

        let mut descriptors = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| SourceError::Api {
                operation: "ListMetrics",
                region: resource.region.clone(),
                reason: e.into_service_error().to_string(),
            })?;
            for metric in page.metrics() {
                let Some(metric_name) = metric.metric_name() else {
                    continue;
                };
                descriptors.push(MetricDescriptor {
                    metric_name: metric_name.to_string(),
                    dimensions: metric
                        .dimensions()
                        .iter()
                        .filter_map(|d| {
                            Some((d.name()?.to_string(), d.value().unwrap_or_default().to_string()))
                        })
                        .collect(),
                });
            }
        }
        Ok(descriptors)
    }

    async fn get_metric_data(
        &self,
        region: &str,
        queries: &[MetricQuery],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SeriesData>, SourceError> {
        let data_queries = queries.iter().map(to_data_query).collect();

        let mut pages = self
            .clients
            .cloudwatch(region)
            .ok_or_else(|| SourceError::UnknownRegion(region.to_string()))?
            .get_metric_data()
            .set_metric_data_queries(Some(data_queries))
            .start_time(to_smithy(start))
            .end_time(to_smithy(end))
            .into_paginator()
            .send();

        let mut series = Vec::new();
        let mut page_count = 0;
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| SourceError::Api {
                operation: "GetMetricData",
                region: region.to_string(),
                reason: e.into_service_error().to_string(),
            })?;
            page_count += 1;
            for result in page.metric_data_results() {
                let Some(id) = result.id() else {
                    continue;
                };
                series.push(SeriesData {
                    id: id.to_string(),
                    timestamps: result.timestamps().iter().map(|ts| ts.secs()).collect(),
                    values: result.values().to_vec(),
                });
            }
        }
        debug!(region, queries = queries.len(), pages = page_count, "fetched metric data");
        Ok(series)
    }
}
