//! Resource-policy documents used as the probe vehicle. Every statement that
//! names a target principal is a Deny; the only Allow ever emitted is the
//! caller-root statement ECR Public needs so the scanner keeps access to its
//! own repository.

use serde::Serialize;

pub const POLICY_VERSION: &str = "2012-10-17";

/// Sid carried by every probe statement; shows up in provider error messages
/// and makes probe policies greppable server-side.
pub const PROBE_SID: &str = "testrole";

#[derive(Debug, Serialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: &'static str,
    #[serde(rename = "Statement")]
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Serialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid")]
    pub sid: &'static str,
    #[serde(rename = "Effect")]
    pub effect: &'static str,
    #[serde(rename = "Principal")]
    pub principal: PolicyPrincipal,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Resource", skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PolicyPrincipal {
    #[serde(rename = "AWS")]
    pub aws: String,
}

/// The standard probe document: a single Deny naming the principal under
/// test. `resource` is omitted for services that reject resource ARNs in
/// their policies.
pub fn deny_probe(resource: Option<&str>, action: &str, principal_arn: &str) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION,
        statement: vec![PolicyStatement {
            sid: PROBE_SID,
            effect: "Deny",
            principal: PolicyPrincipal {
                aws: principal_arn.to_string(),
            },
            action: action.to_string(),
            resource: resource.map(str::to_string),
        }],
    }
}

/// ECR Public variant: the repository policy replaces whatever was there, so
/// an Allow for the caller's own root must ride along or the scanner locks
/// itself out of its repository.
pub fn ecr_public_probe(
    caller_account_id: &str,
    action: &str,
    principal_arn: &str,
) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION,
        statement: vec![
            PolicyStatement {
                sid: "us",
                effect: "Allow",
                principal: PolicyPrincipal {
                    aws: format!("arn:aws:iam::{caller_account_id}:root"),
                },
                action: "ecr-public:*".to_string(),
                resource: None,
            },
            PolicyStatement {
                sid: PROBE_SID,
                effect: "Deny",
                principal: PolicyPrincipal {
                    aws: principal_arn.to_string(),
                },
                action: action.to_string(),
                resource: None,
            },
        ],
    }
}

impl PolicyDocument {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deny_probe_shape() {
        let doc = deny_probe(
            Some("arn:aws:sns:us-east-1:999999999999:probe-topic"),
            "SNS:GetTopicAttributes",
            "arn:aws:iam::123456789012:role/admin",
        );
        let value: serde_json::Value =
            serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Sid": "testrole",
                    "Effect": "Deny",
                    "Principal": { "AWS": "arn:aws:iam::123456789012:role/admin" },
                    "Action": "SNS:GetTopicAttributes",
                    "Resource": "arn:aws:sns:us-east-1:999999999999:probe-topic",
                }]
            })
        );
    }

    #[test]
    fn resource_is_omitted_when_absent() {
        let doc = deny_probe(None, "*", "arn:aws:iam::123456789012:root");
        let rendered = doc.to_json().unwrap();
        assert!(!rendered.contains("Resource"));
    }

    #[test]
    fn ecr_public_probe_keeps_caller_access() {
        let doc = ecr_public_probe(
            "999999999999",
            "ecr-public:DescribeRepositories",
            "arn:aws:iam::123456789012:role/admin",
        );
        let value: serde_json::Value =
            serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        let statements = value["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0]["Effect"], "Allow");
        assert_eq!(
            statements[0]["Principal"]["AWS"],
            "arn:aws:iam::999999999999:root"
        );
        assert_eq!(statements[1]["Effect"], "Deny");
        assert_eq!(
            statements[1]["Principal"]["AWS"],
            "arn:aws:iam::123456789012:role/admin"
        );
    }
}
