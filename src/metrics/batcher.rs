use crate::model::{MetricDescriptor, ResourceRef, Statistic};

/// CloudWatch accepts at most this many queries per GetMetricData call.
pub const MAX_QUERIES_PER_REQUEST: usize = 100;

/// Identifies the series a query result belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub resource: ResourceRef,
    pub metric_name: String,
    pub stat: Statistic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    /// Unique within the request; CloudWatch requires `^[a-z][a-zA-Z0-9_]*$`.
    pub id: String,
    /// Display label only. Results are matched back through `id`.
    pub label: String,
    pub key: SeriesKey,
    pub dimensions: Vec<(String, String)>,
    pub period: i32,
}

pub fn format_label(key: &SeriesKey) -> String {
    format!(
        "{} {} {} {}",
        key.resource.resource_id, key.resource.region, key.metric_name, key.stat
    )
}

/// Inverse of [`format_label`]; only reliable while no field contains a space.
pub fn parse_label(label: &str) -> Option<SeriesKey> {
    let mut parts = label.split(' ');
    let resource_id = parts.next()?;
    let region = parts.next()?;
    let metric_name = parts.next()?;
    let stat = parts.next()?.parse::<Statistic>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(SeriesKey {
        resource: ResourceRef::new(region, resource_id),
        metric_name: metric_name.to_string(),
        stat,
    })
}

/// One query per descriptor and statistic, descriptor-major.
pub fn build_queries(
    resource: &ResourceRef,
    descriptors: &[MetricDescriptor],
    stats: &[Statistic],
    period: i32,
) -> Vec<MetricQuery> {
    descriptors
        .iter()
        .flat_map(|descriptor| stats.iter().map(move |stat| (descriptor, *stat)))
        .enumerate()
        .map(|(n, (descriptor, stat))| {
            let key = SeriesKey {
                resource: resource.clone(),
                metric_name: descriptor.metric_name.clone(),
                stat,
            };
            MetricQuery {
                id: format!("m{}", n),
                label: format_label(&key),
                key,
                dimensions: descriptor.dimensions.clone(),
                period,
            }
        })
        .collect()
}

pub fn chunk(queries: &[MetricQuery]) -> std::slice::Chunks<'_, MetricQuery> {
    queries.chunks(MAX_QUERIES_PER_REQUEST)
}
