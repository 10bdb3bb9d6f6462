use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use opensearch_domain_monitor::clients::AwsClients;
use opensearch_domain_monitor::config;
use opensearch_domain_monitor::events::Trigger;
use opensearch_domain_monitor::sink::opensearch::MonitoringDomain;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    opensearch_domain_monitor::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let mut config = config::Config::load_from_env()?;
    info!("Loaded configuration: {:?}", config);
    let clients = AwsClients::new(&aws_config, &config.regions);

    // if the password provided is an ARN, get it from Secrets Manager
    if config.password.starts_with("arn:aws:secretsmanager:") {
        config.password =
            config::get_password_from_secrets_manager(&aws_config, config.password.clone())
                .await
                .map_err(|e| e.to_string())?;
    };

    let monitoring = MonitoringDomain::from_config(&config)?;

    run(service_fn(|request: LambdaEvent<Trigger>| {
        opensearch_domain_monitor::function_handler(
            &clients,
            monitoring.clone(),
            &config,
            request,
        )
    }))
    .await
}
