//! Candidate expansion: role-name templates × accounts × regions, plus the
//! root principal for every account. Templates use Liquid with exactly two
//! globals, `AccountId` and `Region`; a template with no placeholders renders
//! to itself for every region and the duplicates collapse into one candidate.

use std::{
    collections::{btree_map, BTreeMap},
    path::PathBuf,
};

use liquid::object;
use tracing::debug;

use crate::{arn::PrincipalArn, errors::ScanError, list_file};

/// The current run's candidates and their provenance comments.
///
/// For every role candidate the account's root ARN is also present, so the
/// engine can always gate members on a root probe.
#[derive(Clone, Debug, Default)]
pub struct ScanSet {
    entries: BTreeMap<PrincipalArn, String>,
}

impl ScanSet {
    /// Record a candidate. A duplicate ARN appends the new comment instead
    /// of dropping it.
    pub fn insert(&mut self, arn: PrincipalArn, comment: String) {
        match self.entries.entry(arn) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(comment);
            }
            btree_map::Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if !comment.is_empty() && *existing != comment {
                    if !existing.is_empty() {
                        existing.push_str(", ");
                    }
                    existing.push_str(&comment);
                }
            }
        }
    }

    pub fn comment(&self, arn: &PrincipalArn) -> Option<&str> {
        self.entries.get(arn).map(String::as_str)
    }

    pub fn arns(&self) -> Vec<PrincipalArn> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PrincipalArn, &str)> {
        self.entries.iter().map(|(arn, c)| (arn, c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Inputs to [`expand`]. Accounts come from an inline comma-separated string
/// and/or list files; templates from list files or directories of `*.list`.
#[derive(Debug, Default)]
pub struct ExpandInput {
    pub accounts_inline: String,
    pub account_paths: Vec<PathBuf>,
    pub role_paths: Vec<PathBuf>,
    pub regions: Vec<String>,
}

pub fn expand(input: &ExpandInput) -> Result<ScanSet, ScanError> {
    let mut accounts = if input.account_paths.is_empty() {
        BTreeMap::new()
    } else {
        list_file::load(&input.account_paths)?
    };
    for value in input.accounts_inline.split(',') {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        accounts.entry(value.to_string()).or_default();
    }

    for account in accounts.keys() {
        if account.len() != 12 || !account.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ScanError::input(format!(
                "account id must be 12 digits: {account:?}"
            )));
        }
    }

    if input.role_paths.is_empty() {
        return Err(ScanError::input("no role templates supplied"));
    }
    let templates = list_file::load(&input.role_paths)?;
    if templates.is_empty() {
        return Err(ScanError::input("role template lists are empty"));
    }

    // Parse every template once, up front, so a bad template fails the run
    // before any account is expanded.
    let parser = liquid::ParserBuilder::with_stdlib()
        .build()
        .map_err(|e| ScanError::input(format!("building template parser: {e}")))?;
    let mut parsed = Vec::with_capacity(templates.len());
    for (text, comment) in &templates {
        let template = parser
            .parse(text)
            .map_err(|e| ScanError::input(format!("parsing role template {text:?}: {e}")))?;
        parsed.push((text.as_str(), template, comment.as_str()));
    }

    let mut scan_set = ScanSet::default();
    for (account, account_comment) in &accounts {
        scan_set.insert(PrincipalArn::root(account), account_comment.clone());

        for (text, template, template_comment) in &parsed {
            for region in &input.regions {
                debug!(template = text, %account, %region, "expanding");
                let globals =
                    object!({ "AccountId": account.clone(), "Region": region.clone() });
                let name = template.render(&globals).map_err(|e| {
                    ScanError::input(format!("rendering role template {text:?}: {e}"))
                })?;
                scan_set.insert(
                    PrincipalArn::role(account, &name),
                    format!("{account_comment} - {template_comment}"),
                );
            }
        }
    }

    Ok(scan_set)
}
