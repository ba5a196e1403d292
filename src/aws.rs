//! Credential and region fan-out. Account and region *discovery* belong to
//! outside tooling; the engine only consumes one [`RegionConfig`] per
//! (account, enabled region) pair, built here from the operator's profile
//! and the embedded default region list.

use anyhow::{Context, Result};
use aws_config::{retry::RetryConfig, BehaviorVersion, SdkConfig};
use aws_types::region::Region;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::list_file;

/// Region list compiled into the binary, used when the operator supplies
/// none. Same grammar as any other list file.
static DEFAULT_REGIONS: Lazy<Vec<String>> =
    Lazy::new(|| list_file::parse(include_str!("../data/regions.list")).into_keys().collect());

/// Everything a plugin needs to talk to one region: the scanner-side account
/// id, the region, and a credential-carrying SDK config.
#[derive(Clone, Debug)]
pub struct RegionConfig {
    pub account_id: String,
    pub region: String,
    pub sdk: SdkConfig,
}

pub fn default_regions() -> Vec<String> {
    DEFAULT_REGIONS.clone()
}

/// Resolve the base config (profile, `us-east-1`, adaptive retry so provider
/// throttling is the SDK's problem), look up the caller identity, and fan
/// out one config per region.
pub async fn load_region_configs(
    profile: &str,
    regions: &[String],
) -> Result<Vec<RegionConfig>> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .retry_config(RetryConfig::adaptive());
    if !profile.is_empty() {
        loader = loader.profile_name(profile);
    }
    let base = loader.load().await;

    let identity = aws_sdk_sts::Client::new(&base)
        .get_caller_identity()
        .send()
        .await
        .context("getting caller identity")?;
    let account_id = identity
        .account()
        .context("caller identity carries no account id")?
        .to_string();
    debug!(
        %account_id,
        caller_arn = identity.arn().unwrap_or_default(),
        regions = regions.len(),
        "resolved scanning credentials"
    );

    Ok(regions
        .iter()
        .map(|region| RegionConfig {
            account_id: account_id.clone(),
            region: region.clone(),
            sdk: base
                .to_builder()
                .region(Region::new(region.clone()))
                .build(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_region_list_parses() {
        let regions = default_regions();
        assert!(regions.contains(&"us-east-1".to_string()));
        assert!(regions.contains(&"eu-west-1".to_string()));
        assert!(regions.iter().all(|r| !r.starts_with('#')));
    }
}
