use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::str::FromStr;

/// One monitored domain. Domain names are unique per region, not globally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub region: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(region: impl Into<String>, resource_id: impl Into<String>) -> Self {
        ResourceRef {
            region: region.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_id, self.region)
    }
}

/// A retrievable CloudWatch series for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub metric_name: String,
    pub dimensions: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    Minimum,
    Maximum,
    Average,
}

impl Statistic {
    pub const ALL: [Statistic; 3] = [Statistic::Minimum, Statistic::Maximum, Statistic::Average];

    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Minimum => "Minimum",
            Statistic::Maximum => "Maximum",
            Statistic::Average => "Average",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "Minimum" => Ok(Statistic::Minimum),
            "Maximum" => Ok(Statistic::Maximum),
            "Average" => Ok(Statistic::Average),
            other => Err(format!("unsupported statistic {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub resource: ResourceRef,
    pub timestamp: DateTime<Utc>,
}

/// A single collected data point.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub resource: ResourceRef,
    pub metric_name: String,
    pub stat: Statistic,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Drops sub-second precision. Out of range inputs fall back to the epoch.
pub fn truncate_to_seconds(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// The metric value is stored under its own metric name, so one index holds
/// every series without a generic `value` field.
impl Serialize for MetricValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("region", &self.resource.region)?;
        map.serialize_entry("domain_name", &self.resource.resource_id)?;
        map.serialize_entry("metric_name", &self.metric_name)?;
        map.serialize_entry("stat", self.stat.as_str())?;
        map.serialize_entry(&self.metric_name, &self.value)?;
        map.serialize_entry("@timestamp", &format_timestamp(&self.timestamp))?;
        map.end()
    }
}
