//! SQS queue probe: `SetQueueAttributes` on the `Policy` attribute.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_smithy_types::error::display::DisplayErrorContext;
use tracing::debug;

use crate::{arn::PrincipalArn, aws::RegionConfig, policy};

use super::{error_code, error_message, Plugin, ProbeError, TRACE_PREFIX};

pub const THREADS: usize = 2;

pub fn new_probes(cfgs: &[RegionConfig], threads: usize) -> Vec<Arc<dyn Plugin>> {
    let mut probes: Vec<Arc<dyn Plugin>> = Vec::new();
    for cfg in cfgs {
        let sqs = aws_sdk_sqs::Client::new(&cfg.sdk);
        for thread in 0..threads {
            let queue_name = format!(
                "{TRACE_PREFIX}-sqs-{}-{}-{thread}",
                cfg.region, cfg.account_id
            );
            probes.push(Arc::new(QueueProbe {
                region: cfg.region.clone(),
                thread,
                queue_url: format!(
                    "https://sqs.{}.amazonaws.com/{}/{queue_name}",
                    cfg.region, cfg.account_id
                ),
                queue_arn: format!(
                    "arn:aws:sqs:{}:{}:{queue_name}",
                    cfg.region, cfg.account_id
                ),
                queue_name,
                sqs: sqs.clone(),
            }));
        }
    }
    probes
}

pub struct QueueProbe {
    region: String,
    thread: usize,
    queue_name: String,
    queue_url: String,
    queue_arn: String,
    sqs: aws_sdk_sqs::Client,
}

#[async_trait]
impl Plugin for QueueProbe {
    fn name(&self) -> String {
        format!("sqs-{}-{}", self.region, self.thread)
    }

    async fn setup(&self) -> Result<()> {
        debug!(queue = %self.queue_name, "creating queue");
        self.sqs
            .create_queue()
            .queue_name(&self.queue_name)
            .send()
            .await
            .map_err(|err| {
                anyhow!(
                    "create queue {}: {}",
                    self.queue_name,
                    DisplayErrorContext(&err)
                )
            })?;
        Ok(())
    }

    async fn scan_arn(&self, arn: &PrincipalArn) -> Result<bool, ProbeError> {
        let document =
            policy::deny_probe(Some(&self.queue_arn), "SQS:SendMessage", arn.as_str())
                .to_json()
                .map_err(|e| ProbeError::new(self.name(), "render policy", e))?;

        match self
            .sqs
            .set_queue_attributes()
            .queue_url(&self.queue_url)
            .attributes(QueueAttributeName::Policy, document)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if nonexistent_principal(error_code(&err), error_message(&err)) => Ok(false),
            Err(err) => Err(ProbeError::new(
                self.name(),
                "SetQueueAttributes",
                DisplayErrorContext(&err),
            )),
        }
    }

    async fn clean_up(&self) -> Result<()> {
        if let Err(err) = self
            .sqs
            .delete_queue()
            .queue_url(&self.queue_url)
            .send()
            .await
        {
            let gone = error_code(&err)
                .is_some_and(|c| c == "QueueDoesNotExist" || c.contains("NonExistentQueue"));
            if !gone {
                return Err(anyhow!(
                    "delete queue {}: {}",
                    self.queue_name,
                    DisplayErrorContext(&err)
                ));
            }
            debug!(queue = %self.queue_name, "queue already gone");
        }
        Ok(())
    }
}

/// SQS reports an unresolvable principal as a generic complaint about the
/// `Policy` attribute value.
fn nonexistent_principal(code: Option<&str>, message: &str) -> bool {
    code == Some("InvalidAttributeValue")
        && message.contains("Invalid value for the parameter Policy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_needs_the_policy_parameter_complaint() {
        assert!(nonexistent_principal(
            Some("InvalidAttributeValue"),
            "Invalid value for the parameter Policy. Reason: Policy statements must not allow",
        ));
        assert!(!nonexistent_principal(
            Some("InvalidAttributeValue"),
            "Invalid value for the parameter VisibilityTimeout.",
        ));
        assert!(!nonexistent_principal(
            Some("InvalidAttributeName"),
            "Invalid value for the parameter Policy.",
        ));
    }
}
