//! SNS topic probe: `SetTopicAttributes` on the `Policy` attribute.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_smithy_types::error::display::DisplayErrorContext;
use tracing::debug;

use crate::{arn::PrincipalArn, aws::RegionConfig, policy};

use super::{error_code, error_message, Plugin, ProbeError, TRACE_PREFIX};

pub const THREADS: usize = 2;

pub fn new_probes(cfgs: &[RegionConfig], threads: usize) -> Vec<Arc<dyn Plugin>> {
    let mut probes: Vec<Arc<dyn Plugin>> = Vec::new();
    for cfg in cfgs {
        let sns = aws_sdk_sns::Client::new(&cfg.sdk);
        for thread in 0..threads {
            let topic_name = format!(
                "{TRACE_PREFIX}-sns-{}-{}-{thread}",
                cfg.region, cfg.account_id
            );
            probes.push(Arc::new(TopicProbe {
                region: cfg.region.clone(),
                thread,
                topic_arn: format!(
                    "arn:aws:sns:{}:{}:{topic_name}",
                    cfg.region, cfg.account_id
                ),
                topic_name,
                sns: sns.clone(),
            }));
        }
    }
    probes
}

pub struct TopicProbe {
    region: String,
    thread: usize,
    topic_name: String,
    topic_arn: String,
    sns: aws_sdk_sns::Client,
}

#[async_trait]
impl Plugin for TopicProbe {
    fn name(&self) -> String {
        format!("sns-{}-{}", self.region, self.thread)
    }

    async fn setup(&self) -> Result<()> {
        // CreateTopic with identical attributes is idempotent on the
        // provider side.
        debug!(topic = %self.topic_name, "creating topic");
        self.sns
            .create_topic()
            .name(&self.topic_name)
            .send()
            .await
            .map_err(|err| {
                anyhow!(
                    "create topic {}: {}",
                    self.topic_name,
                    DisplayErrorContext(&err)
                )
            })?;
        Ok(())
    }

    async fn scan_arn(&self, arn: &PrincipalArn) -> Result<bool, ProbeError> {
        let document = policy::deny_probe(
            Some(&self.topic_arn),
            "SNS:GetTopicAttributes",
            arn.as_str(),
        )
        .to_json()
        .map_err(|e| ProbeError::new(self.name(), "render policy", e))?;

        match self
            .sns
            .set_topic_attributes()
            .topic_arn(&self.topic_arn)
            .attribute_name("Policy")
            .attribute_value(document)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if nonexistent_principal(error_code(&err), error_message(&err)) => Ok(false),
            Err(err) => Err(ProbeError::new(
                self.name(),
                "SetTopicAttributes",
                DisplayErrorContext(&err),
            )),
        }
    }

    async fn clean_up(&self) -> Result<()> {
        if let Err(err) = self
            .sns
            .delete_topic()
            .topic_arn(&self.topic_arn)
            .send()
            .await
        {
            if error_code(&err) != Some("NotFound") {
                return Err(anyhow!(
                    "delete topic {}: {}",
                    self.topic_arn,
                    DisplayErrorContext(&err)
                ));
            }
            debug!(topic = %self.topic_name, "topic already gone");
        }
        Ok(())
    }
}

/// An invalid-parameter rejection naming the principal is the absence
/// signal; any other invalid-parameter complaint is a real error.
fn nonexistent_principal(code: Option<&str>, message: &str) -> bool {
    code.is_some_and(|c| c.starts_with("InvalidParameter"))
        && (message.contains("PrincipalNotFound") || message.contains("InvalidArn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_matches_both_principal_signals() {
        assert!(nonexistent_principal(
            Some("InvalidParameter"),
            "Invalid parameter: Policy Error: PrincipalNotFound",
        ));
        assert!(nonexistent_principal(
            Some("InvalidParameterException"),
            "Invalid parameter: InvalidArn",
        ));
        assert!(!nonexistent_principal(
            Some("InvalidParameter"),
            "Invalid parameter: TopicArn",
        ));
        assert!(!nonexistent_principal(
            Some("AuthorizationError"),
            "PrincipalNotFound",
        ));
    }
}
