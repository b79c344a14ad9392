//! Strata build: stage overlays and run the manifest pipeline behind a build guard.
//!
//! The upstream pipeline keeps internal caches that break under parallel runs, so builds through
//! a guarded `BuildContext` are serialized. Overlay documents are staged under a fixed name, so an
//! overlay build also holds the process-wide staging lock of its root from staging to cleanup.
//! Contexts created with `BuildContext::new` use that same lock as their guard, which means every
//! context on one base directory shares a single guard.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use strata_compose::BuildSpec;
use strata_core::ResourceMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod config;
pub mod engine;
pub mod stage;

pub use config::BuildConfig;
pub use engine::{parse_manifest_stream, KustomizeCli, Kustomizer, LoadRestrictor};
pub use stage::{staging_lock, StagedKustomization, STAGED_FILE_NAME};

/// Register help text for the build metrics with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("build_attempts", "Builds started, root and overlay");
    describe_counter!("build_ok", "Builds that returned manifests");
    describe_counter!("build_err", "Builds that failed in staging or in the engine");
    describe_histogram!("build_latency_ms", Unit::Milliseconds, "Time from build start to manifests, lock wait included");
    describe_histogram!("build_lock_wait_ms", Unit::Milliseconds, "Time spent waiting for the build guard and staging lock");
}

/// Handle owning the engine, the staging directory and the build guard.
#[derive(Clone)]
pub struct BuildContext {
    engine: Arc<dyn Kustomizer>,
    base_dir: PathBuf,
    guard: Option<Arc<Mutex<()>>>,
}

impl BuildContext {
    /// Guarded by the staging lock of `base_dir`.
    pub fn new(engine: Arc<dyn Kustomizer>, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let guard = Some(staging_lock(&base_dir));
        Self { engine, base_dir, guard }
    }

    /// For engines that tolerate parallel runs. Path builds run concurrently; overlay builds
    /// still take the staging lock of their root.
    pub fn unguarded(engine: Arc<dyn Kustomizer>, base_dir: impl Into<PathBuf>) -> Self {
        Self { engine, base_dir: base_dir.into(), guard: None }
    }

    /// `kustomize` subprocess engine configured from the environment.
    pub fn from_config(cfg: &BuildConfig) -> Self {
        Self::new(Arc::new(KustomizeCli::from_config(cfg)), cfg.base_dir.clone())
    }

    pub fn base_dir(&self) -> &Path { &self.base_dir }

    /// Build an existing kustomization root.
    pub async fn build_path(&self, root: &Path, restrictor: LoadRestrictor) -> Result<ResourceMap> {
        self.build(None, root, restrictor).await
    }

    /// Stage `spec` in the base directory and build it.
    pub async fn build_overlay(&self, spec: &BuildSpec, restrictor: LoadRestrictor) -> Result<ResourceMap> {
        self.build(Some(spec), &self.base_dir, restrictor).await
    }

    /// With a spec, `root` is where the document is staged; without one it must already be a
    /// kustomization root.
    pub async fn build(&self, spec: Option<&BuildSpec>, root: &Path, restrictor: LoadRestrictor) -> Result<ResourceMap> {
        let prefix = if spec.is_some() { "kustomization overlay" } else { "kustomization build" };
        let yaml = match spec {
            Some(s) => Some(s.to_yaml().map_err(|e| anyhow!("{}: {:#}", prefix, e))?),
            None => None,
        };

        let t0 = Instant::now();
        counter!("build_attempts", 1u64);
        info!(root = %root.display(), overlay = spec.is_some(), restrictor = %restrictor, "build start");

        let staging = spec.map(|_| staging_lock(root));
        let res = {
            let locks = lock_order(self.guard.as_ref(), staging.as_ref());
            let w0 = Instant::now();
            let mut permits = Vec::with_capacity(locks.len());
            for m in &locks {
                permits.push(m.lock().await);
            }
            if !locks.is_empty() {
                histogram!("build_lock_wait_ms", w0.elapsed().as_secs_f64() * 1000.0);
            }
            let out = self.run_locked(yaml.as_deref(), root, restrictor).await;
            drop(permits);
            out
        };

        match res {
            Ok(map) => {
                histogram!("build_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("build_ok", 1u64);
                info!(manifests = map.len(), took_ms = %t0.elapsed().as_millis(), "build ok");
                Ok(map)
            }
            Err(e) => {
                counter!("build_err", 1u64);
                warn!(error = %format!("{:#}", e), "build failed");
                Err(anyhow!("{}: {:#}", prefix, e))
            }
        }
    }

    async fn run_locked(&self, yaml: Option<&str>, root: &Path, restrictor: LoadRestrictor) -> Result<ResourceMap> {
        let _staged = match yaml {
            Some(y) => Some(StagedKustomization::write(root, y).await?),
            None => None,
        };
        self.engine.run(root, restrictor).await
    }
}

// Locks are taken in address order so two builds needing overlapping pairs cannot deadlock.
fn lock_order<'a>(guard: Option<&'a Arc<Mutex<()>>>, staging: Option<&'a Arc<Mutex<()>>>) -> Vec<&'a Arc<Mutex<()>>> {
    let mut locks: Vec<&Arc<Mutex<()>>> = guard.into_iter().chain(staging).collect();
    locks.sort_by_key(|m| Arc::as_ptr(m) as usize);
    locks.dedup_by(|a, b| Arc::ptr_eq(a, b));
    locks
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("base_dir", &self.base_dir)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}
