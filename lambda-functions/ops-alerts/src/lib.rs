//! Alerting pieces shared by the stack Lambdas: where alerts go, what an
//! alert is, and how it gets published.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sns::error::DisplayErrorContext;
use aws_sdk_sns::Client as SnsClient;
use lambda_runtime::Context;
use thiserror::Error;
use tracing::{error, info, warn};

/// Topic that receives human-readable failure alerts.
pub const ERROR_NOTIFICATION_TOPIC: &str = "error-notification";

/// Topic CloudFormation emits stack lifecycle events to.
pub const CLOUDFORMATION_EVENTS_TOPIC: &str = "cloudformation-events";

/// Region and account the current invocation runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub region: String,
    pub account_id: String,
}

impl InvocationContext {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    /// Builds the context from the Lambda runtime context. The account id is
    /// read from the invoked function ARN.
    pub fn from_lambda(context: &Context, region: impl Into<String>) -> Self {
        Self::new(
            region,
            account_id_from_function_arn(&context.invoked_function_arn),
        )
    }

    pub fn topic_arn(&self, topic_name: &str) -> String {
        format!(
            "arn:aws:sns:{}:{}:{}",
            self.region, self.account_id, topic_name
        )
    }

    pub fn error_topic_arn(&self) -> String {
        self.topic_arn(ERROR_NOTIFICATION_TOPIC)
    }
}

/// Returns the 5th colon-delimited segment of a function ARN, or an empty
/// string when the ARN is too short.
pub fn account_id_from_function_arn(function_arn: &str) -> String {
    function_arn
        .split(':')
        .nth(4)
        .unwrap_or_default()
        .to_string()
}

pub fn region_from_env() -> String {
    // Lambda sets both to the same value; AWS_DEFAULT_REGION covers local runs
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| {
            warn!("Neither AWS_REGION nor AWS_DEFAULT_REGION is set, topic ARNs will be malformed");
            String::new()
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub message: String,
    pub topic_arn: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("failed to publish alert to {topic_arn}: {reason}")]
    Publish { topic_arn: String, reason: String },
}

/// Sends an alert somewhere people will see it. Returns the message id
/// assigned by the messaging service, if it reports one.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, alert: &Alert) -> Result<Option<String>, AlertError>;
}

pub struct SnsAlertPublisher {
    client: SnsClient,
}

impl SnsAlertPublisher {
    pub fn new(config: &SdkConfig) -> Self {
        Self::from_client(SnsClient::new(config))
    }

    pub fn from_client(client: SnsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlertPublisher for SnsAlertPublisher {
    async fn publish(&self, alert: &Alert) -> Result<Option<String>, AlertError> {
        let result = self
            .client
            .publish()
            .topic_arn(&alert.topic_arn)
            .subject(&alert.subject)
            .message(&alert.message)
            .send()
            .await;

        match result {
            Ok(output) => {
                let message_id = output.message_id().map(str::to_string);
                info!(
                    topic_arn = %alert.topic_arn,
                    message_id = message_id.as_deref().unwrap_or("none"),
                    "Alert published"
                );
                Ok(message_id)
            }
            Err(e) => {
                let reason = DisplayErrorContext(&e).to_string();
                error!(topic_arn = %alert.topic_arn, "Failed to publish alert: {}", reason);
                Err(AlertError::Publish {
                    topic_arn: alert.topic_arn.clone(),
                    reason,
                })
            }
        }
    }
}
