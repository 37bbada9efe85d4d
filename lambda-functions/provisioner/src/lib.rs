use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::error::DisplayErrorContext;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Parameter, Tag};
use aws_sdk_cloudformation::Client as CloudFormationClient;
use bon::Builder;
use lambda_runtime::LambdaEvent;
use ops_alerts::{Alert, AlertPublisher, InvocationContext, CLOUDFORMATION_EVENTS_TOPIC};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, instrument};

pub const TEMPLATE_URL: &str = "https://editions-us-east-1.s3.amazonaws.com/aws/stable/Docker.tmpl";
pub const TIMEOUT_IN_MINUTES: i32 = 20;
pub const DEFAULT_SIZE: &str = "1";
pub const STACK_TAG_KEY: &str = "CloudFormationStack";

pub const SUCCESS_MESSAGE: &str = "Success creating the Stack.";
pub const ALERT_SUBJECT: &str = "Error during createStack";

#[derive(Builder, Deserialize, Debug, Clone, PartialEq)]
#[builder(on(String, into))]
#[serde(rename_all = "camelCase")]
pub struct StackRequest {
    pub stack_name: String,
    // Not validated here, CloudFormation rejects a missing KeyName
    pub key_pair_name: Option<String>,
    pub manager_size: Option<String>,
    pub cluster_size: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackParameter {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackTag {
    pub key: String,
    pub value: String,
}

/// Everything sent in one CreateStack call.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSpec {
    pub stack_name: String,
    pub template_url: String,
    pub parameters: Vec<StackParameter>,
    pub tags: Vec<StackTag>,
    pub notification_arns: Vec<String>,
    pub capabilities: Vec<Capability>,
    pub on_failure: OnFailure,
    pub enable_termination_protection: bool,
    pub timeout_in_minutes: i32,
}

impl StackSpec {
    pub fn from_request(request: &StackRequest, context: &InvocationContext) -> Self {
        Self {
            stack_name: request.stack_name.clone(),
            template_url: TEMPLATE_URL.to_string(),
            parameters: vec![
                StackParameter {
                    key: "KeyName".to_string(),
                    value: request.key_pair_name.clone(),
                },
                StackParameter {
                    key: "ManagerSize".to_string(),
                    value: Some(size_or_default(request.manager_size.as_deref())),
                },
                StackParameter {
                    key: "ClusterSize".to_string(),
                    value: Some(size_or_default(request.cluster_size.as_deref())),
                },
            ],
            tags: vec![StackTag {
                key: STACK_TAG_KEY.to_string(),
                value: request.stack_name.clone(),
            }],
            notification_arns: vec![context.topic_arn(CLOUDFORMATION_EVENTS_TOPIC)],
            capabilities: vec![Capability::CapabilityIam],
            on_failure: OnFailure::Rollback,
            enable_termination_protection: false,
            timeout_in_minutes: TIMEOUT_IN_MINUTES,
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.key == key)
            .and_then(|p| p.value.as_deref())
    }
}

// Empty strings count as unset.
pub fn size_or_default(size: Option<&str>) -> String {
    size.filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SIZE)
        .to_string()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("{0}")]
    Service(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Error creating the Stack: {0}")]
    CreateStack(#[from] StackError),
}

/// Creates stacks. Returns the stack id when the service reports one.
#[async_trait]
pub trait StackProvisioner: Send + Sync {
    async fn create_stack(&self, spec: &StackSpec) -> Result<Option<String>, StackError>;
}

pub struct CloudFormationProvisioner {
    client: CloudFormationClient,
}

impl CloudFormationProvisioner {
    pub fn new(config: &SdkConfig) -> Self {
        Self::from_client(CloudFormationClient::new(config))
    }

    pub fn from_client(client: CloudFormationClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StackProvisioner for CloudFormationProvisioner {
    async fn create_stack(&self, spec: &StackSpec) -> Result<Option<String>, StackError> {
        let parameters = spec
            .parameters
            .iter()
            .map(|p| {
                Parameter::builder()
                    .parameter_key(&p.key)
                    .set_parameter_value(p.value.clone())
                    .build()
            })
            .collect::<Vec<_>>();

        let tags = spec
            .tags
            .iter()
            .map(|t| Tag::builder().key(&t.key).value(&t.value).build())
            .collect::<Vec<_>>();

        let output = self
            .client
            .create_stack()
            .stack_name(&spec.stack_name)
            .template_url(&spec.template_url)
            .set_parameters(Some(parameters))
            .set_capabilities(Some(spec.capabilities.clone()))
            .on_failure(spec.on_failure.clone())
            .enable_termination_protection(spec.enable_termination_protection)
            .timeout_in_minutes(spec.timeout_in_minutes)
            .set_notification_arns(Some(spec.notification_arns.clone()))
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| StackError::Service(DisplayErrorContext(&e).to_string()))?;

        Ok(output.stack_id().map(str::to_string))
    }
}

pub struct ProvisionerService<S, P> {
    provisioner: S,
    publisher: P,
    region: String,
}

impl<S: StackProvisioner, P: AlertPublisher> ProvisionerService<S, P> {
    pub fn new(provisioner: S, publisher: P, region: impl Into<String>) -> Self {
        Self {
            provisioner,
            publisher,
            region: region.into(),
        }
    }

    pub async fn handle_request(
        &self,
        event: LambdaEvent<StackRequest>,
    ) -> Result<String, ProvisionError> {
        let context = InvocationContext::from_lambda(&event.context, self.region.clone());
        self.provision(&event.payload, &context).await
    }

    /// Issues one CreateStack call. On failure an alert goes to the error
    /// topic before the error is returned; the alert's own delivery does not
    /// change the result.
    #[instrument(skip_all, fields(stack_name = %request.stack_name))]
    pub async fn provision(
        &self,
        request: &StackRequest,
        context: &InvocationContext,
    ) -> Result<String, ProvisionError> {
        let spec = StackSpec::from_request(request, context);

        info!("Creating stack {}", spec.stack_name);

        match self.provisioner.create_stack(&spec).await {
            Ok(stack_id) => {
                info!(
                    stack_id = stack_id.as_deref().unwrap_or("unknown"),
                    "Stack creation started"
                );
                Ok(SUCCESS_MESSAGE.to_string())
            }
            Err(e) => {
                error!("CreateStack failed for {}: {}", spec.stack_name, e);

                let alert = Alert {
                    subject: ALERT_SUBJECT.to_string(),
                    message: format!("{}: {}", ALERT_SUBJECT, e),
                    topic_arn: context.error_topic_arn(),
                };
                if let Err(publish_err) = self.publisher.publish(&alert).await {
                    error!("Failed to send createStack alert: {}", publish_err);
                }

                Err(ProvisionError::CreateStack(e))
            }
        }
    }
}
