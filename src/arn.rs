//! IAM principal ARNs of the two kinds this tool probes: account roots and
//! roles. Everything else is rejected at parse time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ScanError;

/// A validated principal ARN: `arn:<partition>:iam::<accountId>:root` or
/// `arn:<partition>:iam::<accountId>:role/<name>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalArn(String);

impl PrincipalArn {
    /// The root principal for an account: `arn:aws:iam::<account>:root`.
    pub fn root(account_id: &str) -> Self {
        PrincipalArn(format!("arn:aws:iam::{account_id}:root"))
    }

    /// A role principal: `arn:aws:iam::<account>:role/<name>`.
    pub fn role(account_id: &str, name: &str) -> Self {
        PrincipalArn(format!("arn:aws:iam::{account_id}:role/{name}"))
    }

    pub fn parse(s: &str) -> Result<Self, ScanError> {
        let mut parts = s.splitn(6, ':');
        let (arn, partition, service, region, account, resource) = (
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
        );

        if arn != "arn" || partition.is_empty() || service != "iam" || !region.is_empty() {
            return Err(ScanError::input(format!("not an IAM principal ARN: {s}")));
        }
        if account.len() != 12 || !account.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ScanError::input(format!("bad account id in ARN: {s}")));
        }
        let valid = resource == "root"
            || resource.strip_prefix("role/").is_some_and(|name| !name.is_empty());
        if !valid {
            return Err(ScanError::input(format!(
                "expected a root or role principal: {s}"
            )));
        }

        Ok(PrincipalArn(s.to_string()))
    }

    /// The 12-digit account id embedded in the ARN.
    pub fn account_id(&self) -> &str {
        // Shape is validated on construction; the fifth field is the account.
        self.0.splitn(6, ':').nth(4).unwrap_or_default()
    }

    pub fn is_root(&self) -> bool {
        self.0.ends_with(":root")
    }

    /// The root ARN for this principal's account.
    pub fn to_root(&self) -> PrincipalArn {
        PrincipalArn::root(self.account_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
