//! Probe plugins. Each instance owns exactly one provider-side resource
//! (bucket, access point, topic, queue, or public repository) and answers
//! "does this principal exist?" by swapping in a resource policy that names
//! it. Instances are never shared between workers; throughput comes from
//! instantiating several per region.

pub mod access_point;
pub mod bucket;
pub mod ecr_public;
pub mod sns;
pub mod sqs;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use thiserror::Error;

use crate::{arn::PrincipalArn, aws::RegionConfig};

/// Fixed marker embedded in every provisioned resource name so operators can
/// find and clean up stray probe infrastructure.
pub const TRACE_PREFIX: &str = "role-fh9283f";

/// A probe failed for a reason other than the recognized invalid-principal
/// signal. Reported and skipped; never fatal, never cached.
#[derive(Debug, Error)]
#[error("{plugin}: {operation}: {message}")]
pub struct ProbeError {
    pub plugin: String,
    pub operation: &'static str,
    pub message: String,
}

impl ProbeError {
    pub fn new(
        plugin: impl Into<String>,
        operation: &'static str,
        err: impl std::fmt::Display,
    ) -> Self {
        ProbeError {
            plugin: plugin.into(),
            operation,
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier naming the service, region, and thread index.
    fn name(&self) -> String;

    /// Provision the owned resource. Idempotent: a resource already owned by
    /// this account is success.
    async fn setup(&self) -> Result<()>;

    /// Probe one principal: `Ok(true)` when the policy mutation is accepted,
    /// `Ok(false)` on the service's invalid-principal signal.
    async fn scan_arn(&self, arn: &PrincipalArn) -> Result<bool, ProbeError>;

    /// Tear the owned resource down. Idempotent: "not found" is success.
    async fn clean_up(&self) -> Result<()>;
}

/// Service error code, when the failure is a modeled or generic API error.
pub(crate) fn error_code<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(|e| e.meta().code())
}

/// Service error message, empty when unavailable.
pub(crate) fn error_message<E, R>(err: &SdkError<E, R>) -> &str
where
    E: ProvideErrorMetadata,
{
    err.as_service_error()
        .and_then(|e| e.meta().message())
        .unwrap_or_default()
}

/// Instantiate every enabled plugin family across the given regions.
///
/// Thread counts are per family per region; each thread is its own plugin
/// instance with its own resource.
pub fn load_all(cfgs: &[RegionConfig]) -> Vec<Arc<dyn Plugin>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    plugins.extend(access_point::new_probes(cfgs, access_point::THREADS));
    plugins.extend(bucket::new_probes(cfgs, bucket::THREADS));
    plugins.extend(sns::new_probes(cfgs, sns::THREADS));
    plugins.extend(sqs::new_probes(cfgs, sqs::THREADS));
    plugins.extend(ecr_public::new_probes(cfgs, ecr_public::THREADS));
    plugins
}
