//! ECR Public repository probe. The service only offers `CreateRepository`
//! and `SetRepositoryPolicy` through `us-east-1`, so this family skips every
//! other region. Repository policies replace wholesale, hence the extra
//! Allow statement for the caller's own root (see [`policy::ecr_public_probe`]).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_smithy_types::error::display::DisplayErrorContext;
use tracing::debug;

use crate::{arn::PrincipalArn, aws::RegionConfig, policy};

use super::{error_code, error_message, Plugin, ProbeError, TRACE_PREFIX};

pub const THREADS: usize = 4;

const SUPPORTED_REGION: &str = "us-east-1";

pub fn new_probes(cfgs: &[RegionConfig], threads: usize) -> Vec<Arc<dyn Plugin>> {
    let mut probes: Vec<Arc<dyn Plugin>> = Vec::new();
    for cfg in cfgs {
        if cfg.region != SUPPORTED_REGION {
            continue;
        }
        let ecr = aws_sdk_ecrpublic::Client::new(&cfg.sdk);
        for thread in 0..threads {
            probes.push(Arc::new(RepositoryProbe {
                account_id: cfg.account_id.clone(),
                region: cfg.region.clone(),
                thread,
                repository_name: format!(
                    "{TRACE_PREFIX}-ecr-public-{}-{}-{thread}",
                    cfg.region, cfg.account_id
                ),
                ecr: ecr.clone(),
            }));
        }
    }
    probes
}

pub struct RepositoryProbe {
    account_id: String,
    region: String,
    thread: usize,
    repository_name: String,
    ecr: aws_sdk_ecrpublic::Client,
}

#[async_trait]
impl Plugin for RepositoryProbe {
    fn name(&self) -> String {
        format!("ecr-public-{}-{}", self.region, self.thread)
    }

    async fn setup(&self) -> Result<()> {
        debug!(repository = %self.repository_name, "creating repository");
        if let Err(err) = self
            .ecr
            .create_repository()
            .repository_name(&self.repository_name)
            .send()
            .await
        {
            let owned = error_code(&err).is_some_and(|c| c.starts_with("RepositoryAlreadyExists"));
            if !owned {
                return Err(anyhow!(
                    "create repository {}: {}",
                    self.repository_name,
                    DisplayErrorContext(&err)
                ));
            }
            debug!(repository = %self.repository_name, "repository already owned by us");
        }
        Ok(())
    }

    async fn scan_arn(&self, arn: &PrincipalArn) -> Result<bool, ProbeError> {
        let document = policy::ecr_public_probe(
            &self.account_id,
            "ecr-public:DescribeRepositories",
            arn.as_str(),
        )
        .to_json()
        .map_err(|e| ProbeError::new(self.name(), "render policy", e))?;

        match self
            .ecr
            .set_repository_policy()
            .repository_name(&self.repository_name)
            .policy_text(document)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if nonexistent_principal(error_code(&err), error_message(&err)) => Ok(false),
            Err(err) => Err(ProbeError::new(
                self.name(),
                "SetRepositoryPolicy",
                DisplayErrorContext(&err),
            )),
        }
    }

    async fn clean_up(&self) -> Result<()> {
        if let Err(err) = self
            .ecr
            .delete_repository()
            .repository_name(&self.repository_name)
            .send()
            .await
        {
            let gone = error_code(&err).is_some_and(|c| c.starts_with("RepositoryNotFound"));
            if !gone {
                return Err(anyhow!(
                    "delete repository {}: {}",
                    self.repository_name,
                    DisplayErrorContext(&err)
                ));
            }
            debug!(repository = %self.repository_name, "repository already gone");
        }
        Ok(())
    }
}

fn nonexistent_principal(code: Option<&str>, message: &str) -> bool {
    code.is_some_and(|c| c.starts_with("InvalidParameter"))
        && message.contains("Invalid repository policy provided")
}

#[cfg(test)]
mod tests {
    use aws_config::BehaviorVersion;

    use super::*;

    #[test]
    fn only_the_supported_region_gets_probes() {
        let sdk = aws_config::SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .build();
        let cfgs = vec![
            RegionConfig {
                account_id: "999999999999".into(),
                region: "us-east-1".into(),
                sdk: sdk.clone(),
            },
            RegionConfig {
                account_id: "999999999999".into(),
                region: "us-west-2".into(),
                sdk,
            },
        ];
        let probes = new_probes(&cfgs, 3);
        assert_eq!(probes.len(), 3);
        assert!(probes.iter().all(|p| p.name().contains("us-east-1")));
    }

    #[test]
    fn classifier_matches_the_policy_rejection() {
        assert!(nonexistent_principal(
            Some("InvalidParameterException"),
            "Invalid parameter at 'PolicyText' failed: Invalid repository policy provided",
        ));
        assert!(!nonexistent_principal(
            Some("InvalidParameterException"),
            "Invalid parameter at 'RepositoryName'",
        ));
    }
}
