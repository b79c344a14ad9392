//! Strata public API façade (in-process).
//!
//! Frontends (the CLI, or a provider plugin) depend on `StrataApi` rather than on the build
//! crates directly. `InProcApi` composes, builds and assembles in the caller's process.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, describe_counter};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::info;

pub use strata_build::{BuildConfig, BuildContext, Kustomizer, LoadRestrictor};
pub use strata_core::{BuildResult, CoreError, ResourceId, Tier, TieredIds};
pub use strata_diff::{DiffSummary, ManifestChange, ResultDiff};

/// API errors suitable for transport to a remote caller.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StrataError {
    /// Rejected before anything ran.
    #[error("validation: {0}")]
    Validation(String),
    /// The build produced two objects with the same identity.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not_found: {0}")]
    NotFound(String),
    /// Engine or staging failure; the message already carries the component prefix.
    #[error("{0}")]
    Build(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type StrataResult<T> = Result<T, StrataError>;

impl StrataError {
    fn from_core(prefix: &str, e: CoreError) -> Self {
        let msg = format!("{}: {}", prefix, e);
        match e {
            CoreError::DuplicateId(_) => StrataError::Conflict(msg),
            CoreError::MissingField(_) | CoreError::InvalidId(_) => StrataError::Validation(msg),
            CoreError::Mismatch { .. } => StrataError::Internal(msg),
        }
    }
}

/// Describe every metric recorded behind the façade.
pub fn describe_metrics() {
    strata_build::describe_metrics();
    describe_counter!("api_build_rejected", "Requests rejected before a build was attempted");
}

/// Build surface shared by all frontends.
#[async_trait::async_trait]
pub trait StrataApi: Send + Sync {
    /// Build an existing kustomization root. Relative paths resolve against the base directory.
    async fn build_path(&self, path: &Path, restrictor: LoadRestrictor) -> StrataResult<BuildResult>;

    /// Compose an overlay from attributes, stage it in the base directory and build it.
    async fn build_overlay(&self, attrs: &Json) -> StrataResult<BuildResult>;

    /// Compare two results; ids come back in tier order.
    async fn diff(&self, previous: &BuildResult, next: &BuildResult) -> StrataResult<ResultDiff>;
}

// ----------------- Mock implementation -----------------

/// Simple in-memory mock implementation for tests.
#[derive(Debug, Clone, Default)]
pub struct MockApi {
    pub path_result: Option<BuildResult>,
    pub overlay_result: Option<BuildResult>,
    pub diff: Option<ResultDiff>,
}

impl MockApi { pub fn new() -> Self { Self::default() } }

#[async_trait::async_trait]
impl StrataApi for MockApi {
    async fn build_path(&self, path: &Path, _restrictor: LoadRestrictor) -> StrataResult<BuildResult> {
        self.path_result.clone().ok_or_else(|| StrataError::NotFound(format!("no result for {}", path.display())))
    }

    async fn build_overlay(&self, _attrs: &Json) -> StrataResult<BuildResult> {
        self.overlay_result.clone().ok_or_else(|| StrataError::NotFound("no overlay result configured".into()))
    }

    async fn diff(&self, _previous: &BuildResult, _next: &BuildResult) -> StrataResult<ResultDiff> {
        self.diff.clone().ok_or_else(|| StrataError::Internal("no diff configured".into()))
    }
}

// ----------------- In-process implementation -----------------

/// In-process implementation driving a `BuildContext` directly.
#[derive(Debug, Clone)]
pub struct InProcApi {
    ctx: BuildContext,
}

impl InProcApi {
    pub fn new(ctx: BuildContext) -> Self { Self { ctx } }

    /// `kustomize` engine, binary and base directory taken from the environment.
    pub fn from_env() -> Self { Self::new(BuildContext::from_config(&BuildConfig::from_env())) }

    pub fn with_engine(engine: Arc<dyn Kustomizer>, base_dir: impl Into<PathBuf>) -> Self {
        Self::new(BuildContext::new(engine, base_dir))
    }

    pub fn context(&self) -> &BuildContext { &self.ctx }

    fn map_err(e: anyhow::Error) -> StrataError { StrataError::Build(format!("{:#}", e)) }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.ctx.base_dir().join(path) }
    }
}

#[async_trait::async_trait]
impl StrataApi for InProcApi {
    async fn build_path(&self, path: &Path, restrictor: LoadRestrictor) -> StrataResult<BuildResult> {
        let t0 = Instant::now();
        if path.as_os_str().is_empty() {
            counter!("api_build_rejected", 1u64);
            return Err(StrataError::Validation("kustomization build: path must not be empty".into()));
        }
        let root = self.resolve(path);
        info!(root = %root.display(), "api: build_path start");
        let map = self.ctx.build_path(&root, restrictor).await.map_err(Self::map_err)?;
        let res = BuildResult::from_resource_map(&map).map_err(|e| StrataError::from_core("kustomization build", e))?;
        info!(ids = res.len(), fingerprint = %res.fingerprint, took_ms = %t0.elapsed().as_millis(), "api: build_path ok");
        Ok(res)
    }

    async fn build_overlay(&self, attrs: &Json) -> StrataResult<BuildResult> {
        let t0 = Instant::now();
        if !(attrs.is_object() || attrs.is_null()) {
            counter!("api_build_rejected", 1u64);
            return Err(StrataError::Validation("kustomization overlay: attributes must be an object".into()));
        }
        let spec = strata_compose::compose(attrs);
        info!(base_dir = %self.ctx.base_dir().display(), "api: build_overlay start");
        let map = self.ctx.build_overlay(&spec, LoadRestrictor::RootOnly).await.map_err(Self::map_err)?;
        let res = BuildResult::from_resource_map(&map).map_err(|e| StrataError::from_core("kustomization overlay", e))?;
        info!(ids = res.len(), fingerprint = %res.fingerprint, took_ms = %t0.elapsed().as_millis(), "api: build_overlay ok");
        Ok(res)
    }

    async fn diff(&self, previous: &BuildResult, next: &BuildResult) -> StrataResult<ResultDiff> {
        let t0 = Instant::now();
        let res = strata_diff::diff_results(previous, next).map_err(|e| StrataError::Internal(format!("{:#}", e)));
        info!(took_ms = %t0.elapsed().as_millis(), ok = res.is_ok(), "api: diff done");
        res
    }
}
