//! Per-domain collection watermarks.
//!
//! A watermark records the upper bound of the last successful collection
//! window for a (domain, region) pair. Stores only ever move it forward.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::model::{ResourceRef, Watermark};

const DOMAIN_KEY: &str = "domain";
const REGION_KEY: &str = "region";
const TIMESTAMP_ATTR: &str = "Timestamp";
const EPOCH_MILLIS_ATTR: &str = "EpochMillis";

#[derive(thiserror::Error, Debug)]
pub enum WatermarkError {
    #[error("failed reading watermark for {resource}: {reason}")]
    Read { resource: ResourceRef, reason: String },
    #[error("failed writing watermark for {resource}: {reason}")]
    Update { resource: ResourceRef, reason: String },
    #[error("stored watermark for {resource} is not a timestamp: {value}")]
    Corrupt { resource: ResourceRef, value: String },
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<DateTime<Utc>>, WatermarkError>;

    /// Stores `timestamp` only when nothing is stored yet or the stored value
    /// is strictly earlier. Returns whether the watermark moved.
    async fn update(
        &self,
        resource: &ResourceRef,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, WatermarkError>;
}

/// Accepts RFC 3339 as well as offset-less ISO 8601, read as UTC.
pub fn parse_stored_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub struct DynamoDbWatermarkStore {
    client: DynamoDbClient,
    table: String,
}

impl DynamoDbWatermarkStore {
    pub fn new(client: DynamoDbClient, table: impl Into<String>) -> Self {
        DynamoDbWatermarkStore {
            client,
            table: table.into(),
        }
    }
}

impl DynamoDbWatermarkStore {
    async fn fetch_item(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<HashMap<String, AttributeValue>>, WatermarkError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(DOMAIN_KEY, AttributeValue::S(resource.resource_id.clone()))
            .key(REGION_KEY, AttributeValue::S(resource.region.clone()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| WatermarkError::Read {
                resource: resource.clone(),
                reason: e.into_service_error().to_string(),
            })?;
        Ok(response.item().cloned())
    }

    /// Writes both attributes under `condition`. A failed condition is
    /// reported as `Ok(false)`.
    async fn write(
        &self,
        resource: &ResourceRef,
        timestamp: DateTime<Utc>,
        condition: &str,
        previous: Option<&str>,
    ) -> Result<bool, WatermarkError> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key(DOMAIN_KEY, AttributeValue::S(resource.resource_id.clone()))
            .key(REGION_KEY, AttributeValue::S(resource.region.clone()))
            .update_expression("SET #ts = :ts, #ms = :ms")
            .condition_expression(condition)
            .expression_attribute_names("#ts", TIMESTAMP_ATTR)
            .expression_attribute_names("#ms", EPOCH_MILLIS_ATTR)
            .expression_attribute_values(
                ":ts",
                AttributeValue::S(timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
            )
            .expression_attribute_values(
                ":ms",
                AttributeValue::N(timestamp.timestamp_millis().to_string()),
            );
        if let Some(previous) = previous {
            request = request.expression_attribute_values(":prev", AttributeValue::S(previous.to_string()));
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Ok(false)
                } else {
                    Err(WatermarkError::Update {
                        resource: resource.clone(),
                        reason: service_error.to_string(),
                    })
                }
            }
        }
    }

    /// Rows written before `EpochMillis` existed only carry the string
    /// `Timestamp`. Compare against it and replace the row only if it is
    /// still unchanged.
    async fn update_legacy(
        &self,
        resource: &ResourceRef,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, WatermarkError> {
        let Some(item) = self.fetch_item(resource).await? else {
            // deleted in between; start over with the regular condition
            return self.write(resource, timestamp, NEW_OR_OLDER, None).await;
        };
        if item.contains_key(EPOCH_MILLIS_ATTR) {
            debug!(domain = %resource.resource_id, region = %resource.region, "stored watermark is newer, keeping it");
            return Ok(false);
        }
        let Some(stored) = item.get(TIMESTAMP_ATTR).and_then(|attr| attr.as_s().ok()) else {
            return self.write(resource, timestamp, NEW_OR_OLDER, None).await;
        };

        match parse_stored_timestamp(stored) {
            Some(existing) if existing >= timestamp => {
                debug!(domain = %resource.resource_id, region = %resource.region, stored = %stored, "legacy watermark is newer, keeping it");
                Ok(false)
            }
            Some(_) => self.write(resource, timestamp, UNCHANGED_LEGACY, Some(stored)).await,
            None => {
                warn!(domain = %resource.resource_id, region = %resource.region, stored = %stored, "replacing unreadable watermark");
                self.write(resource, timestamp, UNCHANGED_LEGACY, Some(stored)).await
            }
        }
    }
}

/// No row yet, or a row with an earlier `EpochMillis`.
const NEW_OR_OLDER: &str = "attribute_not_exists(#ts) OR #ms < :ms";
/// A legacy row that nobody migrated since it was read.
const UNCHANGED_LEGACY: &str = "attribute_not_exists(#ms) AND #ts = :prev";

#[async_trait]
impl WatermarkStore for DynamoDbWatermarkStore {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let item = self.fetch_item(resource).await?;
        let Some(stored) = item
            .as_ref()
            .and_then(|item| item.get(TIMESTAMP_ATTR))
            .and_then(|attr| attr.as_s().ok())
        else {
            return Ok(None);
        };

        parse_stored_timestamp(stored)
            .map(Some)
            .ok_or_else(|| WatermarkError::Corrupt {
                resource: resource.clone(),
                value: stored.clone(),
            })
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, WatermarkError> {
        if self.write(resource, timestamp, NEW_OR_OLDER, None).await? {
            return Ok(true);
        }
        // the row is either newer or still in the string-only format
        self.update_legacy(resource, timestamp).await
    }
}

/// Process-local store, used where no table is available.
#[derive(Default)]
pub struct InMemoryWatermarkStore {
    marks: Mutex<HashMap<ResourceRef, DateTime<Utc>>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watermarks(watermarks: impl IntoIterator<Item = Watermark>) -> Self {
        let store = Self::default();
        if let Ok(mut marks) = store.marks.lock() {
            marks.extend(watermarks.into_iter().map(|w| (w.resource, w.timestamp)));
        }
        store
    }

    pub fn snapshot(&self) -> Vec<Watermark> {
        let marks = match self.marks.lock() {
            Ok(marks) => marks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out: Vec<Watermark> = marks
            .iter()
            .map(|(resource, timestamp)| Watermark {
                resource: resource.clone(),
                timestamp: *timestamp,
            })
            .collect();
        out.sort_by(|a, b| a.resource.cmp(&b.resource));
        out
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, resource: &ResourceRef) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let marks = self.marks.lock().map_err(|e| WatermarkError::Read {
            resource: resource.clone(),
            reason: e.to_string(),
        })?;
        Ok(marks.get(resource).copied())
    }

    async fn update(
        &self,
        resource: &ResourceRef,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, WatermarkError> {
        let mut marks = self.marks.lock().map_err(|e| WatermarkError::Update {
            resource: resource.clone(),
            reason: e.to_string(),
        })?;
        match marks.get(resource) {
            Some(existing) if *existing >= timestamp => Ok(false),
            _ => {
                marks.insert(resource.clone(), timestamp);
                Ok(true)
            }
        }
    }
}
