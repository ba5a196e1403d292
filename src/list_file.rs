//! The list-file format shared by account, role-template, and region inputs:
//! one entry per line, everything after the first `#` is a provenance
//! comment, blank and comment-only lines are skipped.

use std::{collections::BTreeMap, fs, path::Path};

use crate::errors::ScanError;

/// Files read out of a directory input must carry this extension.
pub const LIST_EXTENSION: &str = "list";

/// Parse list-file content into `value -> comment`.
///
/// A value that repeats keeps the last comment seen.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in content.lines() {
        let (value, comment) = match line.split_once('#') {
            Some((value, comment)) => (value, comment),
            None => (line, ""),
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        entries.insert(value.to_string(), comment.to_string());
    }
    entries
}

/// Load and merge entries from each path. A directory contributes every
/// `*.list` file directly inside it; anything else is read as a single file.
pub fn load(paths: &[impl AsRef<Path>]) -> Result<BTreeMap<String, String>, ScanError> {
    let mut files = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let meta = fs::metadata(path)
            .map_err(|e| ScanError::input(format!("reading {}: {e}", path.display())))?;
        if meta.is_dir() {
            let dir = fs::read_dir(path)
                .map_err(|e| ScanError::input(format!("reading {}: {e}", path.display())))?;
            for entry in dir {
                let entry = entry
                    .map_err(|e| ScanError::input(format!("reading {}: {e}", path.display())))?;
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    continue;
                }
                if entry_path.extension().and_then(|e| e.to_str()) == Some(LIST_EXTENSION) {
                    files.push(entry_path);
                }
            }
        } else {
            files.push(path.to_path_buf());
        }
    }

    let mut entries = BTreeMap::new();
    for file in files {
        let content = fs::read_to_string(&file)
            .map_err(|e| ScanError::input(format!("reading {}: {e}", file.display())))?;
        entries.extend(parse(&content));
    }
    Ok(entries)
}
