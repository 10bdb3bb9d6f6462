use aws_config::SdkConfig;
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_opensearch::Client as OpenSearchClient;
use std::collections::HashMap;

/// A type used to hold the AWS clients required to interact with AWS services
/// used by the lambda function. Domains live in many regions, so one
/// CloudWatch and one OpenSearch Service client is kept per configured region.
#[derive(Clone)]
pub struct AwsClients {
    sdk_config: SdkConfig,
    pub dynamodb: DynamoDbClient,
    pub cloudwatch: HashMap<String, CloudWatchClient>,
    pub opensearch: HashMap<String, OpenSearchClient>,
}

impl AwsClients {
    pub fn new(sdk_config: &SdkConfig, regions: &[String]) -> Self {
        let mut cloudwatch = HashMap::new();
        let mut opensearch = HashMap::new();
        for region in regions {
            let conf = aws_sdk_cloudwatch::config::Builder::from(sdk_config)
                .region(aws_sdk_cloudwatch::config::Region::new(region.clone()))
                .build();
            cloudwatch.insert(region.clone(), CloudWatchClient::from_conf(conf));

            let conf = aws_sdk_opensearch::config::Builder::from(sdk_config)
                .region(aws_sdk_opensearch::config::Region::new(region.clone()))
                .build();
            opensearch.insert(region.clone(), OpenSearchClient::from_conf(conf));
        }

        AwsClients {
            sdk_config: sdk_config.clone(),
            dynamodb: DynamoDbClient::new(sdk_config),
            cloudwatch,
            opensearch,
        }
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }

    pub fn cloudwatch(&self, region: &str) -> Option<&CloudWatchClient> {
        self.cloudwatch.get(region)
    }

    pub fn opensearch(&self, region: &str) -> Option<&OpenSearchClient> {
        self.opensearch.get(region)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use aws_config::BehaviorVersion;

    #[test]
    fn test_one_client_per_region() {
        let sdk_config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .build();
        let regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];
        let clients = AwsClients::new(&sdk_config, &regions);

        assert_eq!(clients.cloudwatch.len(), 2);
        assert_eq!(clients.opensearch.len(), 2);
        let cloudwatch = clients.cloudwatch("eu-west-1").unwrap();
        assert_eq!(
            cloudwatch.config().region().map(|r| r.as_ref()),
            Some("eu-west-1")
        );
        assert!(clients.cloudwatch("ap-south-1").is_none());
        assert!(clients.opensearch("ap-south-1").is_none());
    }
}
