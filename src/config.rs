use std::env;
use std::fmt;
use std::str::FromStr;
use std::string::String;
use std::time::Duration;

use aws_config::SdkConfig;
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;

use crate::retry::RetryPolicy;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("error parsing {name} - {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Mode {
    Metrics,
    Snapshot,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "metrics" => Ok(Mode::Metrics),
            "snapshot" => Ok(Mode::Snapshot),
            other => Err(format!("invalid or unsupported collector mode {}", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone)]
pub struct Config {
    pub mode: Mode,
    /// Monitoring domain base URL, always with a scheme and no trailing slash.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub regions: Vec<String>,
    pub table: Option<String>,
    pub metrics_index: String,
    pub flush_trigger: usize,
    /// CloudWatch period in seconds; matches the schedule interval.
    pub metric_period: i32,
    pub lookback_minutes: i64,
    pub retry_limit: usize,
    pub retry_delay: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("mode", &self.mode)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("regions", &self.regions)
            .field("table", &self.table)
            .field("metrics_index", &self.metrics_index)
            .field("flush_trigger", &self.flush_trigger)
            .field("metric_period", &self.metric_period)
            .field("lookback_minutes", &self.lookback_minutes)
            .finish_non_exhaustive()
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Up to one week.
const LOOKBACK_RANGE: std::ops::RangeInclusive<i64> = 1..=10080;

/// Periods CloudWatch accepts: high resolution 1/5/10/30 seconds or whole minutes.
fn valid_period(seconds: i32) -> bool {
    matches!(seconds, 1 | 5 | 10 | 30) || (seconds > 0 && seconds % 60 == 0)
}

impl Config {
    pub fn load_from_env() -> Result<Config, ConfigError> {
        let mode = parsed("COLLECTOR_MODE", Mode::Metrics)?;

        let endpoint = required("DOMAIN_ENDPOINT")?;
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint
        } else {
            format!("https://{}", endpoint)
        };

        let regions = serde_json::from_str::<Vec<String>>(&required("REGIONS")?).map_err(|e| {
            ConfigError::Invalid {
                name: "REGIONS",
                reason: e.to_string(),
            }
        })?;

        let table = env::var("TABLE").ok().filter(|t| !t.trim().is_empty());
        if mode == Mode::Metrics && table.is_none() {
            return Err(ConfigError::Missing("TABLE"));
        }

        let flush_trigger = parsed("FLUSH_TRIGGER", 1000usize)?;
        if flush_trigger == 0 {
            return Err(ConfigError::Invalid {
                name: "FLUSH_TRIGGER",
                reason: "must be greater than zero".to_string(),
            });
        }

        let metric_period = parsed("METRIC_PERIOD", 300i32)?;
        if !valid_period(metric_period) {
            return Err(ConfigError::Invalid {
                name: "METRIC_PERIOD",
                reason: format!(
                    "{} is not 1, 5, 10, 30 or a positive multiple of 60",
                    metric_period
                ),
            });
        }

        let lookback_minutes = parsed("LOOKBACK_MINUTES", 15i64)?;
        if !LOOKBACK_RANGE.contains(&lookback_minutes) {
            return Err(ConfigError::Invalid {
                name: "LOOKBACK_MINUTES",
                reason: format!(
                    "{} is outside {}..={}",
                    lookback_minutes,
                    LOOKBACK_RANGE.start(),
                    LOOKBACK_RANGE.end()
                ),
            });
        }

        Ok(Config {
            mode,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: required("DOMAIN_ADMIN_UNAME")?,
            password: required("DOMAIN_ADMIN_PW")?,
            regions,
            table,
            metrics_index: env::var("METRICS_INDEX").unwrap_or_else(|_| "domains".to_string()),
            flush_trigger,
            metric_period,
            lookback_minutes,
            retry_limit: parsed("RETRY_LIMIT", 3)?,
            retry_delay: parsed("RETRY_DELAY", 1)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_limit, Duration::from_secs(self.retry_delay))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum KeySourceError {
    #[error("Failed to access AWS Secrets Manager. Please make sure the lambda function has permissions to access the {secret_id} secret. Error: {error:?}")]
    FailedToAccessSecretsManager {
        secret_id: String,
        error: GetSecretValueError,
    },
    #[error("Didn't find the {secret_id} secret in AWS secretsmanager")]
    MissingSecret { secret_id: String },
}

/// Resolves the monitoring domain password when it was configured as a
/// Secrets Manager ARN.
pub async fn get_password_from_secrets_manager(
    aws_config: &SdkConfig,
    secret_id: String,
) -> Result<String, KeySourceError> {
    let secretsmanager = aws_sdk_secretsmanager::Client::new(aws_config);
    let response = secretsmanager
        .get_secret_value()
        .set_secret_id(Some(secret_id.clone()))
        .send()
        .await
        .map_err(|error| KeySourceError::FailedToAccessSecretsManager {
            secret_id: secret_id.clone(),
            error: error.into_service_error(),
        })?;
    response
        .secret_string
        .ok_or(KeySourceError::MissingSecret { secret_id })
}

#[cfg(test)]
mod test {
    use super::*;

    const BASE: [(&str, Option<&str>); 5] = [
        ("DOMAIN_ENDPOINT", Some("search-monitor.us-east-1.es.amazonaws.com")),
        ("DOMAIN_ADMIN_UNAME", Some("admin")),
        ("DOMAIN_ADMIN_PW", Some("s3cret")),
        ("REGIONS", Some(r#"["us-east-1", "eu-west-1"]"#)),
        ("TABLE", Some("timestamps")),
    ];

    #[test]
    fn test_load_defaults() {
        temp_env::with_vars(BASE, || {
            let config = Config::load_from_env().unwrap();
            assert_eq!(config.mode, Mode::Metrics);
            assert_eq!(
                config.endpoint,
                "https://search-monitor.us-east-1.es.amazonaws.com"
            );
            assert_eq!(config.regions, vec!["us-east-1", "eu-west-1"]);
            assert_eq!(config.table.as_deref(), Some("timestamps"));
            assert_eq!(config.metrics_index, "domains");
            assert_eq!(config.flush_trigger, 1000);
            assert_eq!(config.metric_period, 300);
            assert_eq!(config.lookback_minutes, 15);
            assert_eq!(config.retry_limit, 3);
        });
    }

    #[test]
    fn test_missing_endpoint_is_fatal() {
        temp_env::with_vars(BASE, || {
            temp_env::with_var_unset("DOMAIN_ENDPOINT", || {
                let err = Config::load_from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Missing("DOMAIN_ENDPOINT")));
            })
        });
    }

    #[test]
    fn test_regions_must_be_json_array() {
        temp_env::with_vars(BASE, || {
            temp_env::with_var("REGIONS", Some("us-east-1"), || {
                let err = Config::load_from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Invalid { name: "REGIONS", .. }));
            })
        });
    }

    #[test]
    fn test_table_only_required_for_metrics() {
        temp_env::with_vars(BASE, || {
            temp_env::with_var_unset("TABLE", || {
                assert!(matches!(
                    Config::load_from_env(),
                    Err(ConfigError::Missing("TABLE"))
                ));
                temp_env::with_var("COLLECTOR_MODE", Some("snapshot"), || {
                    let config = Config::load_from_env().unwrap();
                    assert_eq!(config.mode, Mode::Snapshot);
                    assert!(config.table.is_none());
                });
            })
        });
    }

    #[test]
    fn test_endpoint_scheme_and_trailing_slash() {
        temp_env::with_vars(BASE, || {
            temp_env::with_var("DOMAIN_ENDPOINT", Some("http://localhost:9200/"), || {
                let config = Config::load_from_env().unwrap();
                assert_eq!(config.endpoint, "http://localhost:9200");
            })
        });
    }

    #[test]
    fn test_invalid_flush_trigger() {
        temp_env::with_vars(BASE, || {
            temp_env::with_var("FLUSH_TRIGGER", Some("0"), || {
                assert!(Config::load_from_env().is_err());
            });
            temp_env::with_var("FLUSH_TRIGGER", Some("lots"), || {
                assert!(Config::load_from_env().is_err());
            });
        });
    }

    #[test]
    fn test_metric_period_must_be_accepted_by_cloudwatch() {
        temp_env::with_vars(BASE, || {
            for period in ["0", "-60", "45", "90"] {
                temp_env::with_var("METRIC_PERIOD", Some(period), || {
                    let err = Config::load_from_env().unwrap_err();
                    assert!(
                        matches!(err, ConfigError::Invalid { name: "METRIC_PERIOD", .. }),
                        "{}",
                        period
                    );
                });
            }
            for (period, expected) in [("1", 1), ("30", 30), ("60", 60), ("3600", 3600)] {
                temp_env::with_var("METRIC_PERIOD", Some(period), || {
                    assert_eq!(Config::load_from_env().unwrap().metric_period, expected);
                });
            }
        });
    }

    #[test]
    fn test_lookback_minutes_range() {
        temp_env::with_vars(BASE, || {
            for lookback in ["0", "-5", "10081", "9223372036854775807"] {
                temp_env::with_var("LOOKBACK_MINUTES", Some(lookback), || {
                    let err = Config::load_from_env().unwrap_err();
                    assert!(
                        matches!(err, ConfigError::Invalid { name: "LOOKBACK_MINUTES", .. }),
                        "{}",
                        lookback
                    );
                });
            }
            temp_env::with_var("LOOKBACK_MINUTES", Some("10080"), || {
                assert_eq!(Config::load_from_env().unwrap().lookback_minutes, 10080);
            });
        });
    }
}
