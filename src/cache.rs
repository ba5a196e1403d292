//! Durable per-scan cache of probe outcomes, one JSON document per scan
//! name, guarded across processes by a pid sidecar lock file and within the
//! process by a mutex.

use std::{
    collections::BTreeMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use tracing::debug;

use crate::{arn::PrincipalArn, errors::ScanError};

/// Tri-state existence knowledge for one principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrincipalStatus {
    Unknown,
    Exists,
    Absent,
}

/// On-disk layout: `<dir>/<name>.json` holding `{ "<arn>": bool, ... }`,
/// with `<name>.json.lock` holding the owner's pid as decimal text.
#[derive(Debug)]
pub struct ScanStore {
    data_path: PathBuf,
    lock_path: PathBuf,
    entries: Mutex<BTreeMap<String, bool>>,
}

impl ScanStore {
    /// Open the named scan under the per-user data directory.
    pub fn open(name: &str) -> Result<Self, ScanError> {
        let dir = data_dir()
            .ok_or_else(|| ScanError::input("unable to determine the home directory"))?;
        Self::open_at(&dir, name)
    }

    /// Open the named scan under an explicit directory.
    ///
    /// Creates the directory (owner-only) and an empty document if missing,
    /// then takes the lock and loads the document. Fails with
    /// [`ScanError::LockHeld`] when another process holds the lock.
    pub fn open_at(dir: &Path, name: &str) -> Result<Self, ScanError> {
        let data_path = dir.join(format!("{name}.json"));
        let lock_path = dir.join(format!("{name}.json.lock"));

        create_private_dir(dir)
            .map_err(|e| ScanError::input(format!("creating {}: {e}", dir.display())))?;
        if !data_path.exists() {
            write_private_file(&data_path, b"{}")
                .map_err(|e| ScanError::input(format!("creating {}: {e}", data_path.display())))?;
        }

        acquire_lock(&lock_path)?;

        let raw = match fs::read(&data_path) {
            Ok(raw) => raw,
            Err(e) => {
                // Leave no stale lock behind on a failed open.
                let _ = fs::remove_file(&lock_path);
                return Err(ScanError::input(format!(
                    "reading {}: {e}",
                    data_path.display()
                )));
            }
        };
        let entries: BTreeMap<String, bool> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(source) => {
                let _ = fs::remove_file(&lock_path);
                return Err(ScanError::CacheCorruption {
                    path: data_path,
                    source,
                });
            }
        };

        debug!(path = %data_path.display(), entries = entries.len(), "cache loaded");
        Ok(ScanStore {
            data_path,
            lock_path,
            entries: Mutex::new(entries),
        })
    }

    pub fn status(&self, arn: &PrincipalArn) -> PrincipalStatus {
        let entries = self.entries.lock().unwrap();
        match entries.get(arn.as_str()) {
            None => PrincipalStatus::Unknown,
            Some(true) => PrincipalStatus::Exists,
            Some(false) => PrincipalStatus::Absent,
        }
    }

    pub fn set(&self, arn: &PrincipalArn, exists: bool) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(arn.as_str().to_string(), exists);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the whole document. Writes happen only here, under the same
    /// mutex as the map.
    pub fn save(&self) -> Result<()> {
        let entries = self.entries.lock().unwrap();
        let data = serde_json::to_vec_pretty(&*entries).context("serializing cache")?;
        write_private_file(&self.data_path, &data)
            .with_context(|| format!("writing {}", self.data_path.display()))?;
        Ok(())
    }

    /// Release the lock file. Safe to call more than once.
    pub fn close(&self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                debug!(path = %self.lock_path.display(), error = %e, "removing lock file");
            }
        }
    }
}

/// Non-blocking advisory lock: atomically create the sidecar file with our
/// pid, or fail naming the pid that got there first. A crashed holder leaves
/// the file behind; recovery is manual by design.
fn acquire_lock(lock_path: &Path) -> Result<(), ScanError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    match options.open(lock_path) {
        Ok(mut file) => {
            write!(file, "{}", std::process::id()).map_err(|e| {
                ScanError::input(format!("writing {}: {e}", lock_path.display()))
            })?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let pid = fs::read_to_string(lock_path).unwrap_or_default();
            Err(ScanError::LockHeld {
                pid: pid.trim().to_string(),
                path: lock_path.to_path_buf(),
            })
        }
        Err(e) => Err(ScanError::input(format!(
            "creating {}: {e}",
            lock_path.display()
        ))),
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".rolecall"))
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}
