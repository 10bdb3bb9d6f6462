//! Daily configuration snapshot of every monitored domain: domain status,
//! index, allocation and shard listings, each written to its own per-day
//! index on the monitoring domain.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::metrics::{list_all_domains, DomainDirectory};
use crate::model::{format_timestamp, ResourceRef};
use crate::retry::RetryPolicy;
use crate::sink::opensearch::MonitoringDomain;
use crate::sink::{DynBulkWriter, SinkBuffer, SinkError};

pub mod cat;
pub mod cluster;

use cluster::{CatApi, ClusterReader};

pub const DOMAIN_CONFIGURATION_INDEX: &str = "domain_configuration";
pub const INDICES_CONFIGURATION_INDEX: &str = "domain_indices_configuration";
pub const NODES_ALLOCATION_INDEX: &str = "domain_nodes_allocation";
pub const SHARDS_CONFIG_INDEX: &str = "domain_shards_config";

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("http request failed: {0}")]
    Http(String),
    #[error("{url} responded {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("failed to sign request: {0}")]
    Signing(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// The parts of a domain status the per-node documents are enriched with.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainProfile {
    pub name: String,
    pub region: String,
    /// Public endpoint, else the VPC endpoint.
    pub endpoint: Option<String>,
    pub instance_type: Option<String>,
    pub ebs_enabled: Option<bool>,
    pub volume_type: Option<String>,
    pub volume_size: Option<i64>,
}

impl DomainProfile {
    pub fn from_status(region: &str, status: &Value) -> Option<Self> {
        let text = |pointer: &str| status.pointer(pointer).and_then(Value::as_str).map(str::to_string);
        Some(DomainProfile {
            name: text("/DomainName")?,
            region: region.to_string(),
            endpoint: text("/Endpoint").or_else(|| text("/Endpoints/vpc")),
            instance_type: text("/ClusterConfig/InstanceType"),
            ebs_enabled: status.pointer("/EBSOptions/EBSEnabled").and_then(Value::as_bool),
            volume_type: text("/EBSOptions/VolumeType"),
            volume_size: status.pointer("/EBSOptions/VolumeSize").and_then(Value::as_i64),
        })
    }

    pub fn base_url(&self) -> Option<String> {
        self.endpoint.as_ref().map(|endpoint| {
            if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{}", endpoint)
            }
        })
    }
}

/// Prepares a status document for indexing: drops the software update date
/// and stamps it with the snapshot time.
pub fn status_document(mut status: Value, timestamp: &str) -> Value {
    if let Some(options) = status
        .get_mut("ServiceSoftwareOptions")
        .and_then(Value::as_object_mut)
    {
        options.remove("AutomatedUpdateDate");
    }
    if let Some(obj) = status.as_object_mut() {
        let name = obj.get("DomainName").cloned().unwrap_or(Value::Null);
        obj.insert("@timestamp".to_string(), Value::String(timestamp.to_string()));
        obj.insert("native_domain".to_string(), name);
    }
    status
}

/// Field types of the snapshot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Date,
    /// Full text with a `keyword` sub-field for aggregations.
    Text,
    Long,
    Integer,
    Float,
    Boolean,
}

impl FieldType {
    fn mapping(self) -> Value {
        match self {
            FieldType::Date => json!({ "type": "date" }),
            FieldType::Text => json!({
                "type": "text",
                "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
            }),
            FieldType::Long => json!({ "type": "long" }),
            FieldType::Integer => json!({ "type": "integer" }),
            FieldType::Float => json!({ "type": "float" }),
            FieldType::Boolean => json!({ "type": "boolean" }),
        }
    }
}

use FieldType::{Boolean, Date, Float, Integer, Long, Text};

/// Typed fields of the configuration index. Dotted names are object paths
/// inside the domain status.
pub const DOMAIN_CONFIGURATION_FIELDS: &[(&str, FieldType)] = &[
    ("@timestamp", Date),
    ("native_domain", Text),
    ("ARN", Text),
    ("AccessPolicies", Text),
    ("DomainId", Text),
    ("DomainName", Text),
    ("Endpoint", Text),
    ("Endpoints.vpc", Text),
    ("EngineVersion", Text),
    ("Created", Boolean),
    ("Deleted", Boolean),
    ("Processing", Boolean),
    ("UpgradeProcessing", Boolean),
    ("AdvancedOptions.indices.fielddata.cache.size", Text),
    ("AdvancedOptions.indices.query.bool.max_clause_count", Text),
    ("AdvancedOptions.override_main_response_version", Text),
    ("AdvancedOptions.rest.action.multi.allow_explicit_index", Text),
    ("AdvancedSecurityOptions.AnonymousAuthEnabled", Boolean),
    ("AdvancedSecurityOptions.Enabled", Boolean),
    ("AdvancedSecurityOptions.InternalUserDatabaseEnabled", Boolean),
    ("AutoTuneOptions.State", Text),
    ("AutoTuneOptions.UseOffPeakWindow", Boolean),
    ("ClusterConfig.ColdStorageOptions.Enabled", Boolean),
    ("ClusterConfig.DedicatedMasterCount", Integer),
    ("ClusterConfig.DedicatedMasterEnabled", Boolean),
    ("ClusterConfig.DedicatedMasterType", Text),
    ("ClusterConfig.InstanceCount", Long),
    ("ClusterConfig.InstanceType", Text),
    ("ClusterConfig.WarmEnabled", Boolean),
    ("ClusterConfig.ZoneAwarenessConfig.AvailabilityZoneCount", Long),
    ("ClusterConfig.ZoneAwarenessEnabled", Boolean),
    ("CognitoOptions.Enabled", Boolean),
    ("DomainEndpointOptions.CustomEndpointEnabled", Boolean),
    ("DomainEndpointOptions.EnforceHTTPS", Boolean),
    ("DomainEndpointOptions.TLSSecurityPolicy", Text),
    ("EBSOptions.EBSEnabled", Boolean),
    ("EBSOptions.Iops", Long),
    ("EBSOptions.Throughput", Long),
    ("EBSOptions.VolumeSize", Long),
    ("EBSOptions.VolumeType", Text),
    ("EncryptionAtRestOptions.Enabled", Boolean),
    ("EncryptionAtRestOptions.KmsKeyId", Text),
    ("NodeToNodeEncryptionOptions.Enabled", Boolean),
    ("OffPeakWindowOptions.Enabled", Boolean),
    ("OffPeakWindowOptions.OffPeakWindow.WindowStartTime.Hours", Long),
    ("OffPeakWindowOptions.OffPeakWindow.WindowStartTime.Minutes", Long),
    ("ServiceSoftwareOptions.Cancellable", Boolean),
    ("ServiceSoftwareOptions.CurrentVersion", Text),
    ("ServiceSoftwareOptions.Description", Text),
    ("ServiceSoftwareOptions.NewVersion", Text),
    ("ServiceSoftwareOptions.OptionalDeployment", Boolean),
    ("ServiceSoftwareOptions.UpdateAvailable", Boolean),
    ("ServiceSoftwareOptions.UpdateStatus", Text),
    ("SnapshotOptions.AutomatedSnapshotStartHour", Long),
    ("SoftwareUpdateOptions.AutoSoftwareUpdateEnabled", Boolean),
    ("VPCOptions.AvailabilityZones", Text),
    ("VPCOptions.SecurityGroupIds", Text),
    ("VPCOptions.SubnetIds", Text),
    ("VPCOptions.VPCId", Text),
];

pub const INDICES_CONFIGURATION_FIELDS: &[(&str, FieldType)] = &[
    ("@timestamp", Date),
    ("native_domain", Text),
    ("health", Text),
    ("status", Text),
    ("index_name", Text),
    ("index_id", Text),
    ("primary_shards", Integer),
    ("replication", Integer),
    ("num_docs", Long),
    ("num_docs_deleted", Long),
    ("total_storage", Float),
    ("primary_storage", Float),
    ("shard_size", Float),
];

pub const NODES_ALLOCATION_FIELDS: &[(&str, FieldType)] = &[
    ("@timestamp", Date),
    ("native_domain", Text),
    ("number_of_shards", Integer),
    ("indices_disk_space_occupied", Float),
    ("total_disk_space_occupied", Long),
    ("free_disk_space_available", Long),
    ("total_disk_space", Long),
    ("total_percentage_of_disk_space_in_use", Long),
    ("host", Text),
    ("ip", Text),
    ("node_id", Text),
    ("node_type", Text),
    ("EBSEnabled", Boolean),
    ("VolumeType", Text),
    ("VolumeSize", Long),
    ("skew_in_percent", Float),
];

pub const SHARDS_CONFIG_FIELDS: &[(&str, FieldType)] = &[
    ("@timestamp", Date),
    ("native_domain", Text),
    ("index_name", Text),
    ("shard_num_in_index", Integer),
    ("primary_or_replica", Text),
    ("state", Text),
    ("docs", Long),
    ("shard_size", Long),
    ("ip", Text),
    ("node_id", Text),
    ("node_type", Text),
    ("is_large_shard", Integer),
    ("is_small_shard", Integer),
];

/// Builds the `mappings` body; dotted names become nested `properties`.
pub fn index_definition(fields: &[(&str, FieldType)]) -> Value {
    let mut root = Map::new();
    for (name, field_type) in fields {
        let mut properties = &mut root;
        let mut path = name.split('.').peekable();
        while let Some(part) = path.next() {
            if path.peek().is_none() {
                properties.insert(part.to_string(), field_type.mapping());
                break;
            }
            let object = properties
                .entry(part.to_string())
                .or_insert_with(|| json!({ "properties": {} }));
            let Some(nested) = object
                .get_mut("properties")
                .and_then(Value::as_object_mut)
            else {
                break;
            };
            properties = nested;
        }
    }
    json!({ "mappings": { "properties": root } })
}

pub struct SnapshotContext<'a> {
    pub directory: &'a dyn DomainDirectory,
    pub reader: &'a dyn ClusterReader,
    pub monitoring: &'a MonitoringDomain,
    pub writer: DynBulkWriter,
    pub retry: RetryPolicy,
    pub flush_trigger: usize,
}

impl SnapshotContext<'_> {
    /// Replaces yesterday's snapshot index with an empty one for today.
    async fn recreate(
        &self,
        prefix: &str,
        day: &str,
        fields: &[(&str, FieldType)],
    ) -> Result<SinkBuffer, SnapshotError> {
        let name = format!("{}-{}", prefix, day);
        self.monitoring.delete_indices(&format!("{}*", prefix)).await?;
        self.monitoring
            .create_index(&name, &index_definition(fields))
            .await?;
        Ok(SinkBuffer::new(
            self.writer.clone(),
            name,
            self.flush_trigger,
            self.retry,
        ))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub domains: usize,
    pub domains_failed: usize,
    pub indices: usize,
    pub nodes: usize,
    pub shards: usize,
}

pub async fn run(
    ctx: &SnapshotContext<'_>,
    regions: &[String],
    now: DateTime<Utc>,
) -> Result<SnapshotSummary, SnapshotError> {
    let start = Instant::now();
    let day = now.format("%Y-%m-%d").to_string();
    let timestamp = format_timestamp(&now);
    let mut summary = SnapshotSummary::default();

    let mut profiles = Vec::new();
    let mut configurations = ctx
        .recreate(DOMAIN_CONFIGURATION_INDEX, &day, DOMAIN_CONFIGURATION_FIELDS)
        .await?;
    for ResourceRef { region, resource_id } in list_all_domains(ctx.directory, ctx.retry, regions).await {
        summary.domains += 1;
        let status = ctx
            .retry
            .run("describe_domain", || ctx.reader.describe_domain(&region, &resource_id))
            .await;
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!(domain = %resource_id, region = %region, error = %e, "failed to describe domain");
                summary.domains_failed += 1;
                continue;
            }
        };
        match DomainProfile::from_status(&region, &status) {
            Some(profile) => profiles.push(profile),
            None => warn!(domain = %resource_id, region = %region, "domain status has no DomainName"),
        }
        configurations.add(&status_document(status, &timestamp)).await?;
    }
    configurations.flush().await?;

    let mut indices = ctx
        .recreate(INDICES_CONFIGURATION_INDEX, &day, INDICES_CONFIGURATION_FIELDS)
        .await?;
    let mut nodes = ctx
        .recreate(NODES_ALLOCATION_INDEX, &day, NODES_ALLOCATION_FIELDS)
        .await?;
    let mut shards = ctx
        .recreate(SHARDS_CONFIG_INDEX, &day, SHARDS_CONFIG_FIELDS)
        .await?;

    for profile in &profiles {
        let Some(base_url) = profile.base_url() else {
            warn!(domain = %profile.name, region = %profile.region, "domain has no endpoint yet");
            continue;
        };
        let read = |api: CatApi| {
            let base_url = base_url.clone();
            async move {
                ctx.retry
                    .run("cat", || ctx.reader.cat(&base_url, &profile.region, api))
                    .await
            }
        };

        let listings = async {
            Ok::<_, SnapshotError>((
                read(CatApi::Indices).await?,
                read(CatApi::Allocation).await?,
                read(CatApi::Shards).await?,
            ))
        };
        let (indices_text, allocation_text, shards_text) = match listings.await {
            Ok(listings) => listings,
            Err(e) => {
                error!(domain = %profile.name, region = %profile.region, error = %e, "failed to read cluster listings");
                summary.domains_failed += 1;
                continue;
            }
        };

        for doc in cat::parse_indices(profile, &indices_text, &timestamp) {
            indices.add(&doc).await?;
            summary.indices += 1;
        }
        for doc in cat::parse_allocation(profile, &allocation_text, &timestamp) {
            nodes.add(&doc).await?;
            summary.nodes += 1;
        }
        for doc in cat::parse_shards(profile, &shards_text, &timestamp) {
            shards.add(&doc).await?;
            summary.shards += 1;
        }
    }

    indices.flush().await?;
    nodes.flush().await?;
    shards.flush().await?;

    info!(
        domains = summary.domains,
        domains_failed = summary.domains_failed,
        indices = summary.indices,
        nodes = summary.nodes,
        shards = summary.shards,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "configuration snapshot completed"
    );
    Ok(summary)
}
