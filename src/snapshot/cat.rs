//! Turns `_cat/indices`, `_cat/allocation` and `_cat/shards` output
//! (requested with `bytes=b`, default columns) into documents.

use serde::Serialize;
use tracing::debug;

use super::DomainProfile;

const GIB: u64 = 1024 * 1024 * 1024;
const LARGE_SHARD_BYTES: u64 = 50 * GIB;
const SMALL_SHARD_BYTES: u64 = 10 * GIB;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub native_domain: String,
    pub health: String,
    pub status: String,
    pub index_name: String,
    pub index_id: String,
    pub primary_shards: u64,
    pub replication: u64,
    pub num_docs: u64,
    pub num_docs_deleted: u64,
    pub total_storage: u64,
    pub primary_storage: u64,
    pub shard_size: f64,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AllocationDocument {
    pub native_domain: String,
    pub number_of_shards: u64,
    pub indices_disk_space_occupied: f64,
    pub total_disk_space_occupied: Option<u64>,
    pub free_disk_space_available: Option<u64>,
    pub total_disk_space: Option<u64>,
    pub total_percentage_of_disk_space_in_use: Option<u64>,
    pub host: String,
    pub ip: String,
    pub node_id: String,
    pub node_type: Option<String>,
    #[serde(rename = "EBSEnabled")]
    pub ebs_enabled: Option<bool>,
    #[serde(rename = "VolumeType")]
    pub volume_type: Option<String>,
    #[serde(rename = "VolumeSize")]
    pub volume_size: Option<i64>,
    pub skew_in_percent: f64,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct ShardDocument {
    pub native_domain: String,
    pub index_name: String,
    pub shard_num_in_index: u32,
    pub primary_or_replica: String,
    pub state: String,
    pub docs: u64,
    pub shard_size: u64,
    pub ip: String,
    pub node_id: String,
    pub node_type: Option<String>,
    pub is_large_shard: u8,
    pub is_small_shard: u8,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
}

fn rows(text: &str, min_columns: usize) -> impl Iterator<Item = Vec<&str>> {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(move |cols| {
            if cols.len() < min_columns {
                if !cols.is_empty() {
                    debug!(columns = cols.len(), "skipping short _cat row");
                }
                return false;
            }
            true
        })
}

pub fn parse_indices(profile: &DomainProfile, text: &str, timestamp: &str) -> Vec<IndexDocument> {
    rows(text, 10)
        .filter_map(|cols| {
            let primary_shards: u64 = cols[4].parse().ok()?;
            let primary_storage: u64 = cols[9].parse().ok()?;
            Some(IndexDocument {
                native_domain: profile.name.clone(),
                health: cols[0].to_string(),
                status: cols[1].to_string(),
                index_name: cols[2].to_string(),
                index_id: cols[3].to_string(),
                primary_shards,
                replication: cols[5].parse().ok()?,
                num_docs: cols[6].parse().ok()?,
                num_docs_deleted: cols[7].parse().ok()?,
                total_storage: cols[8].parse().ok()?,
                primary_storage,
                shard_size: if primary_shards == 0 {
                    0.0
                } else {
                    primary_storage as f64 / primary_shards as f64
                },
                timestamp: timestamp.to_string(),
            })
        })
        .collect()
}

/// Rows without a node (unassigned shards) are skipped. Skew is each node's
/// distance from the mean indices disk usage, in percent of that mean.
pub fn parse_allocation(
    profile: &DomainProfile,
    text: &str,
    timestamp: &str,
) -> Vec<AllocationDocument> {
    let mut docs: Vec<AllocationDocument> = rows(text, 9)
        .filter_map(|cols| {
            Some(AllocationDocument {
                native_domain: profile.name.clone(),
                number_of_shards: cols[0].parse().ok()?,
                indices_disk_space_occupied: cols[1].parse().ok()?,
                total_disk_space_occupied: cols[2].parse().ok(),
                free_disk_space_available: cols[3].parse().ok(),
                total_disk_space: cols[4].parse().ok(),
                total_percentage_of_disk_space_in_use: cols[5].parse().ok(),
                host: cols[6].to_string(),
                ip: cols[7].to_string(),
                node_id: cols[8].to_string(),
                node_type: profile.instance_type.clone(),
                ebs_enabled: profile.ebs_enabled,
                volume_type: profile.volume_type.clone(),
                volume_size: profile.volume_size,
                skew_in_percent: 0.0,
                timestamp: timestamp.to_string(),
            })
        })
        .collect();

    if docs.is_empty() {
        return docs;
    }
    let average = docs.iter().map(|d| d.indices_disk_space_occupied).sum::<f64>() / docs.len() as f64;
    if average > 0.0 {
        for doc in docs.iter_mut() {
            doc.skew_in_percent = (average - doc.indices_disk_space_occupied) / average * 100.0;
        }
    }
    docs
}

pub fn parse_shards(profile: &DomainProfile, text: &str, timestamp: &str) -> Vec<ShardDocument> {
    rows(text, 8)
        .filter_map(|cols| {
            let shard_size: u64 = cols[5].parse().ok()?;
            Some(ShardDocument {
                native_domain: profile.name.clone(),
                index_name: cols[0].to_string(),
                shard_num_in_index: cols[1].parse().ok()?,
                primary_or_replica: cols[2].to_string(),
                state: cols[3].to_string(),
                docs: cols[4].parse().ok()?,
                shard_size,
                ip: cols[6].to_string(),
                node_id: cols[7].to_string(),
                node_type: profile.instance_type.clone(),
                is_large_shard: u8::from(shard_size > LARGE_SHARD_BYTES),
                is_small_shard: u8::from(shard_size < SMALL_SHARD_BYTES),
                timestamp: timestamp.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    const TS: &str = "2024-05-01T12:00:00+00:00";

    fn profile() -> DomainProfile {
        DomainProfile {
            name: "logs".to_string(),
            region: "us-east-1".to_string(),
            endpoint: Some("search-logs.us-east-1.es.amazonaws.com".to_string()),
            instance_type: Some("r6g.large.search".to_string()),
            ebs_enabled: Some(true),
            volume_type: Some("gp3".to_string()),
            volume_size: Some(100),
        }
    }

    #[test]
    fn test_parse_indices() {
        let text = "green open logs-2024.05.01 Xk2_aVq8RkWm 5 1 120000 12 2147483648 1073741824\n\
                    green close archived Q1w2e3\n\
                    yellow open .kibana_1 abc123 1 1 3 0 10240 10240\n";
        let docs = parse_indices(&profile(), text, TS);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].index_name, "logs-2024.05.01");
        assert_eq!(docs[0].primary_shards, 5);
        assert_eq!(docs[0].num_docs, 120000);
        assert_eq!(docs[0].shard_size, 1073741824.0 / 5.0);
        assert_eq!(docs[1].health, "yellow");
        assert_eq!(docs[1].native_domain, "logs");
    }

    #[test]
    fn test_parse_allocation_with_skew() {
        let text = "10 3000 5000 15000 20000 25 10.0.1.10 10.0.1.10 node-a\n\
                    10 1000 3000 17000 20000 15 10.0.1.11 10.0.1.11 node-b\n\
                    2 UNASSIGNED\n";
        let docs = parse_allocation(&profile(), text, TS);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].skew_in_percent, -50.0);
        assert_eq!(docs[1].skew_in_percent, 50.0);
        assert!(docs.iter().map(|d| d.skew_in_percent).sum::<f64>().abs() < 1e-9);
        assert_eq!(docs[0].node_type.as_deref(), Some("r6g.large.search"));
        assert_eq!(docs[0].volume_size, Some(100));
        assert_eq!(docs[1].total_percentage_of_disk_space_in_use, Some(15));

        let json = serde_json::to_value(&docs[0]).unwrap();
        assert_eq!(json["EBSEnabled"], true);
        assert_eq!(json["@timestamp"], TS);
    }

    #[test]
    fn test_allocation_with_empty_disks() {
        let text = "0 0 0 20000 20000 0 10.0.1.10 10.0.1.10 node-a\n";
        let docs = parse_allocation(&profile(), text, TS);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].skew_in_percent, 0.0);
        assert!(parse_allocation(&profile(), "", TS).is_empty());
    }

    #[test]
    fn test_parse_shards_size_flags() {
        let large = 60 * GIB;
        let text = format!(
            "logs 0 p STARTED 1000 {} 10.0.1.10 node-a\n\
             logs 0 r STARTED 1000 {} 10.0.1.11 node-b\n\
             logs 1 r UNASSIGNED\n",
            large, GIB
        );
        let docs = parse_shards(&profile(), &text, TS);
        assert_eq!(docs.len(), 2);
        assert_eq!((docs[0].is_large_shard, docs[0].is_small_shard), (1, 0));
        assert_eq!((docs[1].is_large_shard, docs[1].is_small_shard), (0, 1));
        assert_eq!(docs[1].primary_or_replica, "r");
    }
}
