//! S3 access-point probe. Each instance owns a per-region bucket plus one
//! access point on it; `PutAccessPointPolicy` is the probe surface.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3control::types::PublicAccessBlockConfiguration;
use aws_smithy_types::error::display::DisplayErrorContext;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{arn::PrincipalArn, aws::RegionConfig, policy};

use super::{error_code, error_message, Plugin, ProbeError, TRACE_PREFIX};

pub const THREADS: usize = 4;

pub fn new_probes(cfgs: &[RegionConfig], threads: usize) -> Vec<Arc<dyn Plugin>> {
    let mut probes: Vec<Arc<dyn Plugin>> = Vec::new();
    for cfg in cfgs {
        let s3 = aws_sdk_s3::Client::new(&cfg.sdk);
        let s3control = aws_sdk_s3control::Client::new(&cfg.sdk);
        for thread in 0..threads {
            let access_point_name = format!(
                "{TRACE_PREFIX}-ap-{}-{}-{thread}",
                cfg.region, cfg.account_id
            );
            probes.push(Arc::new(AccessPointProbe {
                account_id: cfg.account_id.clone(),
                region: cfg.region.clone(),
                thread,
                bucket_name: format!(
                    "{TRACE_PREFIX}-bucket-{}-{}-{thread}",
                    cfg.region, cfg.account_id
                ),
                access_point_arn: format!(
                    "arn:aws:s3:{}:{}:accesspoint/{access_point_name}",
                    cfg.region, cfg.account_id
                ),
                access_point_name,
                s3: s3.clone(),
                s3control: s3control.clone(),
            }));
        }
    }
    probes
}

pub struct AccessPointProbe {
    account_id: String,
    region: String,
    thread: usize,
    bucket_name: String,
    access_point_name: String,
    access_point_arn: String,
    s3: aws_sdk_s3::Client,
    s3control: aws_sdk_s3control::Client,
}

#[async_trait]
impl Plugin for AccessPointProbe {
    fn name(&self) -> String {
        format!("access-point-{}-{}", self.region, self.thread)
    }

    async fn setup(&self) -> Result<()> {
        create_bucket(&self.s3, &self.bucket_name, &self.region).await?;

        let created = self
            .s3control
            .create_access_point()
            .name(&self.access_point_name)
            .account_id(&self.account_id)
            .bucket(&self.bucket_name)
            .bucket_account_id(&self.account_id)
            .public_access_block_configuration(
                PublicAccessBlockConfiguration::builder()
                    .block_public_acls(true)
                    .block_public_policy(true)
                    .ignore_public_acls(true)
                    .restrict_public_buckets(true)
                    .build(),
            )
            .send()
            .await;
        if let Err(err) = created {
            if error_code(&err) != Some("AccessPointAlreadyOwnedByYou") {
                return Err(anyhow!(
                    "create access point {}: {}",
                    self.access_point_name,
                    DisplayErrorContext(&err)
                ));
            }
            debug!(name = %self.access_point_name, "access point already owned by us");
        }
        Ok(())
    }

    async fn scan_arn(&self, arn: &PrincipalArn) -> Result<bool, ProbeError> {
        let document = policy::deny_probe(Some(&self.access_point_arn), "*", arn.as_str())
            .to_json()
            .map_err(|e| ProbeError::new(self.name(), "render policy", e))?;

        match self
            .s3control
            .put_access_point_policy()
            .account_id(&self.account_id)
            .name(&self.access_point_name)
            .policy(document)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if malformed_policy_invalid_principal(error_code(&err), error_message(&err)) => {
                Ok(false)
            }
            Err(err) => Err(ProbeError::new(
                self.name(),
                "PutAccessPointPolicy",
                DisplayErrorContext(&err),
            )),
        }
    }

    async fn clean_up(&self) -> Result<()> {
        // Delete every access point still hanging off the bucket, not just
        // the one this thread provisioned.
        match self
            .s3control
            .list_access_points()
            .account_id(&self.account_id)
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            Ok(listed) => {
                for point in listed.access_point_list() {
                    let name = point.name();
                    debug!(name, "deleting access point");
                    if let Err(err) = self
                        .s3control
                        .delete_access_point()
                        .account_id(&self.account_id)
                        .name(name)
                        .send()
                        .await
                    {
                        if error_code(&err) != Some("NoSuchAccessPoint") {
                            warn!(name, error = %DisplayErrorContext(&err), "deleting access point");
                        }
                    }
                }
            }
            Err(err) if error_code(&err) == Some("NoSuchBucket") => {}
            Err(err) => {
                return Err(anyhow!(
                    "list access points for {}: {}",
                    self.bucket_name,
                    DisplayErrorContext(&err)
                ))
            }
        }

        delete_bucket(&self.s3, &self.bucket_name).await
    }
}

/// Both S3-family probes share the classifier: an unmodeled `MalformedPolicy`
/// whose message names an invalid principal.
pub(super) fn malformed_policy_invalid_principal(code: Option<&str>, message: &str) -> bool {
    code == Some("MalformedPolicy") && message.to_lowercase().contains("invalid principal")
}

/// Create a bucket in the plugin's region. `us-east-1` rejects an explicit
/// location constraint; everywhere else requires one.
pub(super) async fn create_bucket(
    s3: &aws_sdk_s3::Client,
    bucket_name: &str,
    region: &str,
) -> Result<()> {
    let mut request = s3.create_bucket().bucket(bucket_name);
    if region != "us-east-1" {
        request = request.create_bucket_configuration(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build(),
        );
    }

    if let Err(err) = request.send().await {
        if error_code(&err) != Some("BucketAlreadyOwnedByYou") {
            return Err(anyhow!(
                "create bucket {bucket_name}: {}",
                DisplayErrorContext(&err)
            ));
        }
        debug!(bucket = bucket_name, "bucket already owned by us");
    }
    Ok(())
}

pub(super) async fn delete_bucket(s3: &aws_sdk_s3::Client, bucket_name: &str) -> Result<()> {
    if let Err(err) = s3.delete_bucket().bucket(bucket_name).send().await {
        if error_code(&err) != Some("NoSuchBucket") {
            return Err(anyhow!(
                "delete bucket {bucket_name}: {}",
                DisplayErrorContext(&err)
            ));
        }
        debug!(bucket = bucket_name, "bucket already gone");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_requires_both_code_and_message() {
        assert!(malformed_policy_invalid_principal(
            Some("MalformedPolicy"),
            "Invalid principal in policy",
        ));
        assert!(malformed_policy_invalid_principal(
            Some("MalformedPolicy"),
            "invalid PRINCIPAL in policy",
        ));
        assert!(!malformed_policy_invalid_principal(
            Some("MalformedPolicy"),
            "Policy has invalid action",
        ));
        assert!(!malformed_policy_invalid_principal(
            Some("AccessDenied"),
            "Invalid principal in policy",
        ));
        assert!(!malformed_policy_invalid_principal(None, "invalid principal"));
    }

    #[test]
    fn resource_names_are_deterministic() {
        let cfg = RegionConfig {
            account_id: "999999999999".into(),
            region: "eu-west-1".into(),
            sdk: aws_config::SdkConfig::builder()
                .behavior_version(aws_config::BehaviorVersion::latest())
                .build(),
        };
        let probes = new_probes(std::slice::from_ref(&cfg), 2);
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0].name(), "access-point-eu-west-1-0");
        assert_eq!(probes[1].name(), "access-point-eu-west-1-1");
    }
}
