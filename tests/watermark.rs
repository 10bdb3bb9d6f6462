use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
use aws_smithy_types::body::SdkBody;
use chrono::{TimeZone, Utc};
use opensearch_domain_monitor::model::ResourceRef;
use opensearch_domain_monitor::watermark::{DynamoDbWatermarkStore, WatermarkError, WatermarkStore};

// get_mock_dynamodb returns a client that answers with the given status and body
fn get_mock_dynamodb(status: u16, body: &str) -> (Client, StaticReplayClient) {
    get_mock_dynamodb_sequence(&[(status, body)])
}

// get_mock_dynamodb_sequence answers each request with the next response in order
fn get_mock_dynamodb_sequence(responses: &[(u16, &str)]) -> (Client, StaticReplayClient) {
    let replay_events = responses
        .iter()
        .map(|(status, body)| {
            ReplayEvent::new(
                http::Request::builder()
                    .uri("https://dynamodb.eu-central-1.amazonaws.com/")
                    .body(SdkBody::from(""))
                    .unwrap(),
                http::Response::builder()
                    .status(*status)
                    .header("content-type", "application/x-amz-json-1.0")
                    .body(SdkBody::from(body.to_string()))
                    .unwrap(),
            )
        })
        .collect();
    let http_client = StaticReplayClient::new(replay_events);

    let conf = aws_sdk_dynamodb::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .credentials_provider(aws_sdk_dynamodb::config::Credentials::new(
            "SOMETESTKEYID",
            "somesecretkey",
            Some("somesessiontoken".to_string()),
            None,
            "",
        ))
        .region(aws_sdk_dynamodb::config::Region::new("eu-central-1"))
        .http_client(http_client.clone())
        .build();

    (Client::from_conf(conf), http_client)
}

fn sent_bodies(http_client: &StaticReplayClient) -> Vec<serde_json::Value> {
    http_client
        .actual_requests()
        .map(|r| serde_json::from_slice(r.body().bytes().unwrap()).unwrap())
        .collect()
}

fn sent_body(http_client: &StaticReplayClient) -> serde_json::Value {
    let mut requests = sent_bodies(http_client);
    assert_eq!(requests.len(), 1);
    requests.remove(0)
}

const CONDITION_FAILED: &str = r#"{"__type": "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException",
    "message": "The conditional request failed"}"#;

#[tokio::test]
async fn test_get_reads_legacy_timestamp_as_utc() {
    let (client, http_client) = get_mock_dynamodb(
        200,
        r#"{"Item": {
            "domain": {"S": "dom-a"},
            "region": {"S": "us-east-1"},
            "Timestamp": {"S": "2024-05-01T11:55:00.123456"}
        }}"#,
    );
    let store = DynamoDbWatermarkStore::new(client, "timestamps");

    let stored = store
        .get(&ResourceRef::new("us-east-1", "dom-a"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.timestamp(), Utc.with_ymd_and_hms(2024, 5, 1, 11, 55, 0).unwrap().timestamp());

    let request = sent_body(&http_client);
    assert_eq!(request["TableName"], "timestamps");
    assert_eq!(request["Key"]["domain"]["S"], "dom-a");
    assert_eq!(request["Key"]["region"]["S"], "us-east-1");
    assert_eq!(request["ConsistentRead"], true);
}

#[tokio::test]
async fn test_get_missing_item() {
    let (client, _) = get_mock_dynamodb(200, "{}");
    let store = DynamoDbWatermarkStore::new(client, "timestamps");
    let stored = store.get(&ResourceRef::new("us-east-1", "dom-new")).await.unwrap();
    assert_eq!(stored, None);
}

#[tokio::test]
async fn test_get_corrupt_timestamp() {
    let (client, _) = get_mock_dynamodb(
        200,
        r#"{"Item": {"Timestamp": {"S": "yesterday"}}}"#,
    );
    let store = DynamoDbWatermarkStore::new(client, "timestamps");
    let err = store
        .get(&ResourceRef::new("us-east-1", "dom-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, WatermarkError::Corrupt { value, .. } if value == "yesterday"));
}

#[tokio::test]
async fn test_update_is_conditional() {
    let (client, http_client) = get_mock_dynamodb(200, "{}");
    let store = DynamoDbWatermarkStore::new(client, "timestamps");
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let advanced = store
        .update(&ResourceRef::new("eu-west-1", "dom-a"), now)
        .await
        .unwrap();
    assert!(advanced);

    let request = sent_body(&http_client);
    assert_eq!(request["Key"]["region"]["S"], "eu-west-1");
    assert_eq!(
        request["ConditionExpression"],
        "attribute_not_exists(#ts) OR #ms < :ms"
    );
    assert_eq!(
        request["ExpressionAttributeValues"][":ms"]["N"],
        now.timestamp_millis().to_string()
    );
    assert_eq!(
        request["ExpressionAttributeValues"][":ts"]["S"],
        "2024-05-01T12:00:00.000000Z"
    );
}

#[tokio::test]
async fn test_update_with_newer_stored_value_is_not_an_error() {
    let (client, http_client) = get_mock_dynamodb_sequence(&[
        (400, CONDITION_FAILED),
        (
            200,
            r#"{"Item": {
                "Timestamp": {"S": "2024-05-01T12:00:00.000000Z"},
                "EpochMillis": {"N": "1714564800000"}
            }}"#,
        ),
    ]);
    let store = DynamoDbWatermarkStore::new(client, "timestamps");
    let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();

    let advanced = store
        .update(&ResourceRef::new("us-east-1", "dom-a"), earlier)
        .await
        .unwrap();
    assert!(!advanced);
    // no write after reading the newer row
    assert_eq!(sent_bodies(&http_client).len(), 2);
}

#[tokio::test]
async fn test_newer_legacy_row_is_not_regressed() {
    let (client, http_client) = get_mock_dynamodb_sequence(&[
        (400, CONDITION_FAILED),
        (200, r#"{"Item": {"Timestamp": {"S": "2024-05-01T12:30:00.000000"}}}"#),
    ]);
    let store = DynamoDbWatermarkStore::new(client, "timestamps");
    let earlier = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let advanced = store
        .update(&ResourceRef::new("us-east-1", "dom-a"), earlier)
        .await
        .unwrap();
    assert!(!advanced);

    let requests = sent_bodies(&http_client);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1]["ConsistentRead"], true);
    assert!(requests[1].get("ConditionExpression").is_none());
}

#[tokio::test]
async fn test_older_legacy_row_is_migrated() {
    let (client, http_client) = get_mock_dynamodb_sequence(&[
        (400, CONDITION_FAILED),
        (200, r#"{"Item": {"Timestamp": {"S": "2024-05-01T11:55:00.123456"}}}"#),
        (200, "{}"),
    ]);
    let store = DynamoDbWatermarkStore::new(client, "timestamps");
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let advanced = store
        .update(&ResourceRef::new("us-east-1", "dom-a"), now)
        .await
        .unwrap();
    assert!(advanced);

    let requests = sent_bodies(&http_client);
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[2]["ConditionExpression"],
        "attribute_not_exists(#ms) AND #ts = :prev"
    );
    assert_eq!(
        requests[2]["ExpressionAttributeValues"][":prev"]["S"],
        "2024-05-01T11:55:00.123456"
    );
    assert_eq!(
        requests[2]["ExpressionAttributeValues"][":ms"]["N"],
        now.timestamp_millis().to_string()
    );
}

#[tokio::test]
async fn test_legacy_row_changed_concurrently() {
    let (client, _) = get_mock_dynamodb_sequence(&[
        (400, CONDITION_FAILED),
        (200, r#"{"Item": {"Timestamp": {"S": "2024-05-01T11:55:00"}}}"#),
        (400, CONDITION_FAILED),
    ]);
    let store = DynamoDbWatermarkStore::new(client, "timestamps");
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let advanced = store
        .update(&ResourceRef::new("us-east-1", "dom-a"), now)
        .await
        .unwrap();
    assert!(!advanced);
}

#[tokio::test]
async fn test_update_failure_surfaces() {
    let (client, _) = get_mock_dynamodb(
        400,
        r#"{"__type": "com.amazonaws.dynamodb.v20120810#ResourceNotFoundException",
            "message": "Requested resource not found"}"#,
    );
    let store = DynamoDbWatermarkStore::new(client, "missing");
    let err = store
        .update(&ResourceRef::new("us-east-1", "dom-a"), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, WatermarkError::Update { .. }));
}
