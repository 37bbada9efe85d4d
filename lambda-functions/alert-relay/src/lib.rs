use aws_lambda_events::event::sns::SnsEvent;
use chrono::Utc;
use lambda_runtime::LambdaEvent;
use ops_alerts::{Alert, AlertPublisher, InvocationContext};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Status CloudFormation reports when a stack starts rolling back.
pub const ROLLBACK_MARKER: &str = "ROLLBACK_IN_PROGRESS";

/// Line of a CloudFormation notification holding `StackName='...'`.
pub const SUBJECT_FIELD_INDEX: usize = 11;

const SUBJECT_SUFFIX: &str = " is in ROLLBACK_IN_PROGRESS";

// ASCII apostrophe plus the left/right curly quotes.
const QUOTE_CHARS: [char; 3] = ['\'', '\u{2018}', '\u{2019}'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("notification body has {found} fields, at least {required} are needed for the subject")]
    MissingSubjectField { found: usize, required: usize },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelayOutcome {
    Skipped,
    Published {
        subject: String,
        message_id: Option<String>,
    },
    PublishFailed {
        subject: String,
        error: String,
    },
    Malformed {
        error: String,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub outcomes: Vec<RelayOutcome>,
    pub timestamp: String,
}

pub fn is_rollback_notification(body: &str) -> bool {
    body.contains(ROLLBACK_MARKER)
}

/// Pulls the subject line out of a notification body, with quotes removed.
pub fn extract_subject(body: &str) -> Result<String, ParseError> {
    let mut fields = body.split('\n');
    match fields.nth(SUBJECT_FIELD_INDEX) {
        Some(field) => Ok(field.chars().filter(|c| !QUOTE_CHARS.contains(c)).collect()),
        None => Err(ParseError::MissingSubjectField {
            found: body.split('\n').count(),
            required: SUBJECT_FIELD_INDEX + 1,
        }),
    }
}

/// Builds the rollback alert for a notification body. Returns `Ok(None)` when
/// the body is not about a rollback.
pub fn build_alert(body: &str, context: &InvocationContext) -> Result<Option<Alert>, ParseError> {
    if !is_rollback_notification(body) {
        return Ok(None);
    }

    let subject = extract_subject(body)?;

    Ok(Some(Alert {
        subject: format!("{}{}", subject, SUBJECT_SUFFIX),
        message: body.to_string(),
        topic_arn: context.error_topic_arn(),
    }))
}

pub struct RelayService<P> {
    publisher: P,
    region: String,
}

impl<P: AlertPublisher> RelayService<P> {
    pub fn new(publisher: P, region: impl Into<String>) -> Self {
        Self {
            publisher,
            region: region.into(),
        }
    }

    /// Relays a single notification body. Never fails: publish errors are
    /// logged and reported in the outcome.
    #[instrument(skip_all, fields(topic_arn = %context.error_topic_arn()))]
    pub async fn relay(&self, context: &InvocationContext, body: &str) -> RelayOutcome {
        let alert = match build_alert(body, context) {
            Ok(Some(alert)) => alert,
            Ok(None) => return RelayOutcome::Skipped,
            Err(e) => {
                warn!("Rollback notification without a subject line: {}", e);
                return RelayOutcome::Malformed {
                    error: e.to_string(),
                };
            }
        };

        info!("Relaying rollback alert: {}", alert.subject);

        match self.publisher.publish(&alert).await {
            Ok(message_id) => RelayOutcome::Published {
                subject: alert.subject,
                message_id,
            },
            Err(e) => {
                error!("Rollback alert was not delivered: {}", e);
                RelayOutcome::PublishFailed {
                    subject: alert.subject,
                    error: e.to_string(),
                }
            }
        }
    }

    pub async fn handle_event(&self, event: LambdaEvent<SnsEvent>) -> Response {
        let context = InvocationContext::from_lambda(&event.context, self.region.clone());

        if event.payload.records.is_empty() {
            warn!("SNS event contained no records");
        }

        let mut outcomes = Vec::with_capacity(event.payload.records.len());
        for record in &event.payload.records {
            outcomes.push(self.relay(&context, &record.sns.message).await);
        }

        Response {
            outcomes,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_alerts::AlertError;
    use std::sync::Mutex;

    struct RecordingPublisher {
        sent: Mutex<Vec<Alert>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl AlertPublisher for RecordingPublisher {
        async fn publish(&self, alert: &Alert) -> Result<Option<String>, AlertError> {
            self.sent.lock().unwrap().push(alert.clone());
            if self.fail {
                Err(AlertError::Publish {
                    topic_arn: alert.topic_arn.clone(),
                    reason: "throttled".to_string(),
                })
            } else {
                Ok(Some("msg-1".to_string()))
            }
        }
    }

    fn body_with_stack(stack_line: &str) -> String {
        let mut lines: Vec<String> = (0..SUBJECT_FIELD_INDEX)
            .map(|i| format!("Field{}='value'", i))
            .collect();
        lines[8] = "ResourceStatus='ROLLBACK_IN_PROGRESS'".to_string();
        lines.push(stack_line.to_string());
        lines.join("\n")
    }

    #[test]
    fn test_extract_subject_strips_quotes() {
        let body = body_with_stack("StackName=\u{2018}swarm\u{2019}-'prod'");
        assert_eq!(extract_subject(&body).unwrap(), "StackName=swarm-prod");
    }

    #[test]
    fn test_extract_subject_keeps_other_characters() {
        let body = body_with_stack("StackName=\"swarm prod\"\r");
        assert_eq!(extract_subject(&body).unwrap(), "StackName=\"swarm prod\"\r");
    }

    #[test]
    fn test_extract_subject_too_short() {
        let err = extract_subject("a\nb\nc").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingSubjectField {
                found: 3,
                required: 12
            }
        );
    }

    #[test]
    fn test_build_alert_without_marker() {
        let context = InvocationContext::new("us-east-1", "123456789012");
        let body = "ResourceStatus='CREATE_COMPLETE'";
        assert_eq!(build_alert(body, &context).unwrap(), None);
    }

    #[test]
    fn test_build_alert_with_marker() {
        let context = InvocationContext::new("us-east-1", "123456789012");
        let body = body_with_stack("StackName='swarm-prod'");

        let alert = build_alert(&body, &context).unwrap().unwrap();
        assert_eq!(alert.subject, "StackName=swarm-prod is in ROLLBACK_IN_PROGRESS");
        assert_eq!(alert.message, body);
        assert_eq!(
            alert.topic_arn,
            "arn:aws:sns:us-east-1:123456789012:error-notification"
        );
    }

    #[test]
    fn test_relay_reports_publish_failure() {
        let service = RelayService::new(
            RecordingPublisher {
                sent: Mutex::new(Vec::new()),
                fail: true,
            },
            "us-east-1",
        );
        let context = InvocationContext::new("us-east-1", "123456789012");
        let body = body_with_stack("StackName='swarm-prod'");

        let outcome = tokio_test::block_on(service.relay(&context, &body));

        assert!(matches!(outcome, RelayOutcome::PublishFailed { .. }));
        assert_eq!(service.publisher.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_relay_skips_short_rollback_body() {
        let service = RelayService::new(
            RecordingPublisher {
                sent: Mutex::new(Vec::new()),
                fail: false,
            },
            "us-east-1",
        );
        let context = InvocationContext::new("us-east-1", "123456789012");

        let outcome = tokio_test::block_on(service.relay(&context, "ROLLBACK_IN_PROGRESS"));

        assert!(matches!(outcome, RelayOutcome::Malformed { .. }));
        assert!(service.publisher.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RelayOutcome::Published {
            subject: "StackName=swarm-prod is in ROLLBACK_IN_PROGRESS".to_string(),
            message_id: Some("msg-1".to_string()),
        };

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "published");
        assert_eq!(json["message_id"], "msg-1");

        let skipped = serde_json::to_value(RelayOutcome::Skipped).unwrap();
        assert_eq!(skipped["status"], "skipped");
    }
}
