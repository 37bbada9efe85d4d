use alert_relay::{RelayService, Response};
use aws_config::BehaviorVersion;
use aws_lambda_events::event::sns::SnsEvent;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use ops_alerts::{region_from_env, SnsAlertPublisher};

async fn function_handler(
    service: &RelayService<SnsAlertPublisher>,
    event: LambdaEvent<SnsEvent>,
) -> Result<Response, Error> {
    Ok(service.handle_event(event).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let service = RelayService::new(SnsAlertPublisher::new(&config), region_from_env());
    let service = &service;

    run(service_fn(move |event: LambdaEvent<SnsEvent>| async move {
        function_handler(service, event).await
    }))
    .await
}
