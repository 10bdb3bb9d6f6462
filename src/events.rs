use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;

use serde::de::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

/// What woke the function up. The payload itself carries no work: every
/// invocation covers all configured regions.
#[derive(Debug)]
pub enum Trigger {
    Scheduled(CloudWatchEvent),
    Manual(Value),
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Scheduled(_) => "scheduled",
            Trigger::Manual(_) => "manual",
        }
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw_value: Value = Deserialize::deserialize(deserializer)?;
        debug!("raw_value: {:?}", raw_value);

        if let Ok(event) = CloudWatchEvent::deserialize(&raw_value) {
            if event.source.is_some() {
                tracing::info!("scheduled event detected");
                return Ok(Trigger::Scheduled(event));
            }
        }

        tracing::info!("manual invocation detected");
        Ok(Trigger::Manual(raw_value))
    }
}
