//! Plain S3 bucket probe: `PutBucketPolicy` on a per-region bucket.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_smithy_types::error::display::DisplayErrorContext;
use tracing::debug;

use crate::{arn::PrincipalArn, aws::RegionConfig, policy};

use super::{
    access_point::{create_bucket, delete_bucket, malformed_policy_invalid_principal},
    error_code, error_message, Plugin, ProbeError, TRACE_PREFIX,
};

pub const THREADS: usize = 4;

pub fn new_probes(cfgs: &[RegionConfig], threads: usize) -> Vec<Arc<dyn Plugin>> {
    let mut probes: Vec<Arc<dyn Plugin>> = Vec::new();
    for cfg in cfgs {
        let s3 = aws_sdk_s3::Client::new(&cfg.sdk);
        for thread in 0..threads {
            probes.push(Arc::new(BucketProbe {
                region: cfg.region.clone(),
                thread,
                bucket_name: format!(
                    "{TRACE_PREFIX}-s3-bucket-{}-{}-{thread}",
                    cfg.region, cfg.account_id
                ),
                s3: s3.clone(),
            }));
        }
    }
    probes
}

pub struct BucketProbe {
    region: String,
    thread: usize,
    bucket_name: String,
    s3: aws_sdk_s3::Client,
}

#[async_trait]
impl Plugin for BucketProbe {
    fn name(&self) -> String {
        format!("s3-{}-{}", self.region, self.thread)
    }

    async fn setup(&self) -> Result<()> {
        create_bucket(&self.s3, &self.bucket_name, &self.region).await
    }

    async fn scan_arn(&self, arn: &PrincipalArn) -> Result<bool, ProbeError> {
        let bucket_arn = format!("arn:aws:s3:::{}", self.bucket_name);
        let document = policy::deny_probe(Some(&bucket_arn), "*", arn.as_str())
            .to_json()
            .map_err(|e| ProbeError::new(self.name(), "render policy", e))?;

        match self
            .s3
            .put_bucket_policy()
            .bucket(&self.bucket_name)
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
                "PutBucketPolicy",
                DisplayErrorContext(&err),
            )),
        }
    }

    async fn clean_up(&self) -> Result<()> {
        // Drop the probe policy first; a failure here just means there was
        // nothing attached.
        if let Err(err) = self
            .s3
            .delete_bucket_policy()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            debug!(bucket = %self.bucket_name, error = %DisplayErrorContext(&err), "deleting bucket policy");
        }

        delete_bucket(&self.s3, &self.bucket_name).await
    }
}
