use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use super::batcher::{self, MetricQuery};
use super::MetricSource;
use crate::model::{truncate_to_seconds, MetricDescriptor, MetricValue, ResourceRef, Statistic};
use crate::watermark::WatermarkStore;

#[derive(Debug, Default)]
pub struct CollectionOutcome {
    pub values: Vec<MetricValue>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    /// Set when a batch failed; the watermark was left where it was.
    pub failed: bool,
    pub watermark_advanced: bool,
}

pub struct Collector<'a> {
    source: &'a dyn MetricSource,
    store: &'a dyn WatermarkStore,
    period: i32,
    lookback: Duration,
}

impl<'a> Collector<'a> {
    pub fn new(
        source: &'a dyn MetricSource,
        store: &'a dyn WatermarkStore,
        period: i32,
        lookback: Duration,
    ) -> Self {
        Collector {
            source,
            store,
            period,
            lookback,
        }
    }

    /// Lower bound of the next window. Store failures fall back to the
    /// lookback default instead of aborting the run.
    pub async fn window_start(&self, resource: &ResourceRef, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.store.get(resource).await {
            Ok(Some(ts)) => ts,
            Ok(None) => self.default_start(now),
            Err(e) => {
                warn!(domain = %resource.resource_id, region = %resource.region, error = %e, "could not read watermark, using default window");
                self.default_start(now)
            }
        }
    }

    /// `now - lookback`, or fifteen minutes back when that is not representable.
    fn default_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lookback).unwrap_or_else(|| {
            warn!(lookback = %self.lookback, "lookback out of range, using 15 minutes");
            now.checked_sub_signed(Duration::minutes(15)).unwrap_or(now)
        })
    }

    /// Collects `[watermark, now)` for one domain. The watermark moves to
    /// `now` rather than the newest point seen, so a point landing exactly
    /// on the boundary can be missed.
    pub async fn collect(
        &self,
        resource: &ResourceRef,
        descriptors: &[MetricDescriptor],
        now: DateTime<Utc>,
    ) -> CollectionOutcome {
        let mut outcome = CollectionOutcome::default();
        let start = self.window_start(resource, now).await;
        outcome.window_start = Some(start);
        outcome.window_end = Some(now);

        let queries = batcher::build_queries(resource, descriptors, &Statistic::ALL, self.period);
        if queries.is_empty() {
            debug!(domain = %resource.resource_id, region = %resource.region, "no metrics to query");
            return outcome;
        }

        for (idx, group) in batcher::chunk(&queries).enumerate() {
            match self
                .source
                .get_metric_data(&resource.region, group, start, now)
                .await
            {
                Ok(series) => outcome.values.extend(to_values(group, series)),
                Err(e) => {
                    error!(
                        domain = %resource.resource_id,
                        region = %resource.region,
                        chunk = idx,
                        error = %e,
                        "failed to retrieve metric data"
                    );
                    outcome.failed = true;
                    break;
                }
            }
        }

        if outcome.failed {
            return outcome;
        }

        match self.store.update(resource, now).await {
            Ok(advanced) => outcome.watermark_advanced = advanced,
            Err(e) => {
                warn!(domain = %resource.resource_id, region = %resource.region, error = %e, "failed to store watermark")
            }
        }
        info!(
            domain = %resource.resource_id,
            region = %resource.region,
            values = outcome.values.len(),
            window_start = %start,
            window_end = %now,
            "collected metric values"
        );
        outcome
    }
}

fn to_values(group: &[MetricQuery], series: Vec<crate::metrics::SeriesData>) -> Vec<MetricValue> {
    let by_id: HashMap<&str, &MetricQuery> = group.iter().map(|q| (q.id.as_str(), q)).collect();
    let mut values = Vec::new();
    for data in series {
        let Some(query) = by_id.get(data.id.as_str()) else {
            warn!(id = %data.id, "result for unknown query id");
            continue;
        };
        values.extend(
            data.timestamps
                .iter()
                .zip(data.values.iter())
                .map(|(ts, value)| MetricValue {
                    resource: query.key.resource.clone(),
                    metric_name: query.key.metric_name.clone(),
                    stat: query.key.stat,
                    value: *value,
                    timestamp: truncate_to_seconds(*ts),
                }),
        );
    }
    values
}
