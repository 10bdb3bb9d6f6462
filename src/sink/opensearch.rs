use async_trait::async_trait;
use http::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BulkOutcome, BulkWriter, SinkError};
use crate::config::Config;

/// The OpenSearch domain that receives the monitoring documents.
#[derive(Clone)]
pub struct MonitoringDomain {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

#[derive(Deserialize, Debug)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Deserialize, Debug)]
struct BulkItem {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl MonitoringDomain {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let endpoint = endpoint.into();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|source| SinkError::Transport {
                url: endpoint.clone(),
                source,
            })?;
        Ok(MonitoringDomain {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SinkError> {
        Self::new(&config.endpoint, &config.username, &config.password)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> (String, reqwest::RequestBuilder) {
        let url = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        let builder = self
            .http
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password))
            .header(
                USER_AGENT,
                concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
            );
        (url, builder)
    }

    async fn send(url: String, builder: reqwest::RequestBuilder) -> Result<(StatusCode, String), SinkError> {
        let response = builder.send().await.map_err(|source| SinkError::Transport {
            url: url.clone(),
            source,
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| SinkError::Transport { url, source })?;
        Ok((status, body))
    }

    /// Deletes every index matching `pattern`. A missing index is not an error.
    pub async fn delete_indices(&self, pattern: &str) -> Result<(), SinkError> {
        let (url, builder) = self.request(reqwest::Method::DELETE, pattern);
        let (status, body) = Self::send(url.clone(), builder).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(pattern, %status, "deleted indices");
            return Ok(());
        }
        Err(SinkError::Status { url, status, body })
    }

    pub async fn create_index(&self, name: &str, definition: &Value) -> Result<(), SinkError> {
        let (url, builder) = self.request(reqwest::Method::PUT, name);
        let builder = builder
            .header(CONTENT_TYPE, "application/json")
            .body(definition.to_string());
        let (status, body) = Self::send(url.clone(), builder).await?;
        if status.is_success() {
            debug!(index = name, "created index");
            return Ok(());
        }
        Err(SinkError::Status { url, status, body })
    }
}

#[async_trait]
impl BulkWriter for MonitoringDomain {
    async fn bulk(&self, body: String, count: usize) -> Result<BulkOutcome, SinkError> {
        let (url, builder) = self.request(reqwest::Method::POST, "_bulk");
        let builder = builder
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let (status, text) = Self::send(url.clone(), builder).await?;
        if !status.is_success() {
            return Err(SinkError::Status {
                url,
                status,
                body: text,
            });
        }

        let response: BulkResponse =
            serde_json::from_str(&text).map_err(|e| SinkError::Response(e.to_string()))?;
        let failed = if response.errors {
            response
                .items
                .iter()
                .flat_map(|item| item.values())
                .filter(|item| item.error.is_some() || item.status >= 300)
                .inspect(|item| warn!(status = item.status, error = ?item.error, "document rejected"))
                .count()
        } else {
            0
        };
        Ok(BulkOutcome {
            written: count.saturating_sub(failed),
            failed,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_bulk_counts_rejected_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "took": 3,
                "errors": true,
                "items": [
                    { "index": { "_index": "domains", "status": 201 } },
                    { "index": { "_index": "domains", "status": 400,
                                 "error": { "type": "mapper_parsing_exception" } } },
                    { "index": { "_index": "domains", "status": 201 } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let domain = MonitoringDomain::new(server.uri(), "admin", "pw").unwrap();
        let outcome = domain.bulk("{}\n{}\n".repeat(3), 3).await.unwrap();
        assert_eq!(outcome, BulkOutcome { written: 2, failed: 1 });
    }

    #[tokio::test]
    async fn test_bulk_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let domain = MonitoringDomain::new(server.uri(), "admin", "pw").unwrap();
        let err = domain.bulk("{}\n{}\n".to_string(), 1).await.unwrap_err();
        assert!(matches!(err, SinkError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_delete_missing_index_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/domain_configuration*"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let domain = MonitoringDomain::new(server.uri(), "admin", "pw").unwrap();
        domain.delete_indices("domain_configuration*").await.unwrap();
    }
}
