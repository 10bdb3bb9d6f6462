use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningParams, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use serde_json::Value;
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::SnapshotError;

/// Signing name shared by the configuration API and domain endpoints.
const SIGNING_NAME: &str = "es";
const CONFIG_API_VERSION: &str = "2021-01-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatApi {
    Indices,
    Allocation,
    Shards,
}

impl CatApi {
    pub fn path(&self) -> &'static str {
        match self {
            CatApi::Indices => "_cat/indices?bytes=b",
            CatApi::Allocation => "_cat/allocation?bytes=b",
            CatApi::Shards => "_cat/shards?bytes=b",
        }
    }
}

#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// The domain's `DomainStatus` as returned by the configuration API.
    async fn describe_domain(&self, region: &str, name: &str) -> Result<Value, SnapshotError>;

    /// Raw text of a `_cat` API on the domain at `base_url`.
    async fn cat(&self, base_url: &str, region: &str, api: CatApi) -> Result<String, SnapshotError>;
}

/// Talks to the configuration API and the domains themselves with SigV4
/// signed requests. The lambda's role has to be mapped as a backend role in
/// every monitored domain.
pub struct SignedClusterReader {
    http: reqwest::Client,
    credentials: SharedCredentialsProvider,
    config_api_base: Option<String>,
}

impl SignedClusterReader {
    pub fn new(credentials: SharedCredentialsProvider) -> Result<Self, SnapshotError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SnapshotError::Http(e.to_string()))?;
        Ok(SignedClusterReader {
            http,
            credentials,
            config_api_base: None,
        })
    }

    /// Overrides `https://es.<region>.amazonaws.com`.
    pub fn with_config_api_base(mut self, base: impl Into<String>) -> Self {
        self.config_api_base = Some(base.into());
        self
    }

    fn config_api_url(&self, region: &str, name: &str) -> String {
        let base = self
            .config_api_base
            .clone()
            .unwrap_or_else(|| format!("https://es.{}.amazonaws.com", region));
        format!(
            "{}/{}/opensearch/domain/{}",
            base.trim_end_matches('/'),
            CONFIG_API_VERSION,
            name
        )
    }

    async fn signed_get(&self, url: &str, region: &str) -> Result<String, SnapshotError> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| SnapshotError::Signing(e.to_string()))?;
        let identity: Identity = credentials.into();
        let signing_params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(region)
            .name(SIGNING_NAME)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| SnapshotError::Signing(e.to_string()))?
            .into();
        let signable = SignableRequest::new("GET", url, std::iter::empty(), SignableBody::Bytes(&[]))
            .map_err(|e| SnapshotError::Signing(e.to_string()))?;
        let (instructions, _signature) = sign(signable, &signing_params)
            .map_err(|e| SnapshotError::Signing(e.to_string()))?
            .into_parts();

        let mut request = self.http.get(url);
        for (name, value) in instructions.headers() {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SnapshotError::Http(format!("{}: {}", url, e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SnapshotError::Http(format!("{}: {}", url, e)))?;
        if !status.is_success() {
            return Err(SnapshotError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        debug!(url, bytes = body.len(), "signed request completed");
        Ok(body)
    }
}

#[async_trait]
impl ClusterReader for SignedClusterReader {
    async fn describe_domain(&self, region: &str, name: &str) -> Result<Value, SnapshotError> {
        let url = self.config_api_url(region, name);
        let body = self.signed_get(&url, region).await?;
        let mut response: Value =
            serde_json::from_str(&body).map_err(|e| SnapshotError::Malformed(e.to_string()))?;
        match response.get_mut("DomainStatus").map(Value::take) {
            Some(status @ Value::Object(_)) => Ok(status),
            _ => Err(SnapshotError::Malformed(format!(
                "no DomainStatus for domain {}",
                name
            ))),
        }
    }

    async fn cat(&self, base_url: &str, region: &str, api: CatApi) -> Result<String, SnapshotError> {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), api.path());
        self.signed_get(&url, region).await
    }
}
