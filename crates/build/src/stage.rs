//! Scoped Kustomization document written for one overlay build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name the staged document is written under.
pub const STAGED_FILE_NAME: &str = "Kustomization";

/// Names the build recognizes as a kustomization root.
pub const KUSTOMIZATION_FILE_NAMES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", STAGED_FILE_NAME];

static STAGING_LOCKS: Lazy<StdMutex<HashMap<PathBuf, Weak<Mutex<()>>>>> = Lazy::new(|| StdMutex::new(HashMap::new()));

/// Process-wide lock for staging into `root`.
///
/// Every caller naming the same directory (after canonicalization) gets the same lock, so two
/// contexts sharing a base directory never see each other's staged document.
pub fn staging_lock(root: &Path) -> Arc<Mutex<()>> {
    let key = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut locks = STAGING_LOCKS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
        return lock;
    }
    locks.retain(|_, w| w.strong_count() > 0);
    let lock = Arc::new(Mutex::new(()));
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

/// Removes the staged document when dropped, on success and error paths alike.
#[derive(Debug)]
pub struct StagedKustomization {
    path: PathBuf,
}

impl StagedKustomization {
    /// Write `yaml` into `root`. Refuses to touch a root that already has a kustomization.
    pub async fn write(root: &Path, yaml: &str) -> Result<Self> {
        for name in KUSTOMIZATION_FILE_NAMES {
            let existing = root.join(name);
            if tokio::fs::try_exists(&existing).await.unwrap_or(false) {
                bail!("refusing to overwrite existing {} in {}", name, root.display());
            }
        }
        let path = root.join(STAGED_FILE_NAME);
        tokio::fs::write(&path, yaml).await.with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), bytes = yaml.len(), "staged kustomization");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl Drop for StagedKustomization {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove staged kustomization");
        }
    }
}
