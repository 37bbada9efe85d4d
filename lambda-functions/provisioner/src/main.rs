use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use ops_alerts::{region_from_env, SnsAlertPublisher};
use provisioner::{CloudFormationProvisioner, ProvisionerService, StackRequest};

type Service = ProvisionerService<CloudFormationProvisioner, SnsAlertPublisher>;

async fn function_handler(
    service: &Service,
    event: LambdaEvent<StackRequest>,
) -> Result<String, Error> {
    Ok(service.handle_request(event).await?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let service = ProvisionerService::new(
        CloudFormationProvisioner::new(&config),
        SnsAlertPublisher::new(&config),
        region_from_env(),
    );
    let service = &service;

    run(service_fn(move |event: LambdaEvent<StackRequest>| async move {
        function_handler(service, event).await
    }))
    .await
}
