//! The external manifest pipeline, seen as `run(root, restrictor) -> ResourceMap`.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use strata_core::{ResourceEntry, ResourceMap};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::BuildConfig;

/// Which files the build may load relative to its root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadRestrictor {
    /// Only files in or below the root (`""`).
    #[default]
    RootOnly,
    /// Anything readable (`"none"`).
    Unrestricted,
}

impl LoadRestrictor {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadRestrictor::RootOnly => "",
            LoadRestrictor::Unrestricted => "none",
        }
    }

    fn cli_args(self) -> &'static [&'static str] {
        match self {
            LoadRestrictor::RootOnly => &[],
            LoadRestrictor::Unrestricted => &["--load-restrictor", "LoadRestrictionsNone"],
        }
    }
}

impl FromStr for LoadRestrictor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(LoadRestrictor::RootOnly),
            "none" => Ok(LoadRestrictor::Unrestricted),
            other => Err(anyhow!("invalid load_restrictor {:?}: expected \"none\" or \"\"", other)),
        }
    }
}

impl fmt::Display for LoadRestrictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Runs a kustomization root and returns the resulting manifests.
///
/// Implementations are not assumed to be safe for concurrent use; `BuildContext` serializes calls.
#[async_trait::async_trait]
pub trait Kustomizer: Send + Sync {
    async fn run(&self, root: &Path, restrictor: LoadRestrictor) -> Result<ResourceMap>;
}

/// Shells out to `kustomize build`.
#[derive(Debug, Clone)]
pub struct KustomizeCli {
    bin: String,
    max_output_bytes: usize,
}

impl KustomizeCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into(), max_output_bytes: crate::config::DEFAULT_MAX_OUTPUT_BYTES }
    }

    pub fn from_config(cfg: &BuildConfig) -> Self {
        Self { bin: cfg.kustomize_bin.clone(), max_output_bytes: cfg.max_output_bytes }
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }
}

/// Stderr beyond this is drained and dropped; only the head ends up in the error.
const MAX_STDERR_BYTES: u64 = 64 * 1024;

#[async_trait::async_trait]
impl Kustomizer for KustomizeCli {
    /// Stdout is read incrementally and the child is killed once it passes `max_output_bytes`,
    /// so memory stays bounded by the limit.
    async fn run(&self, root: &Path, restrictor: LoadRestrictor) -> Result<ResourceMap> {
        debug!(bin = %self.bin, root = %root.display(), restrictor = %restrictor, "running kustomize");
        let mut child = Command::new(&self.bin)
            .arg("build")
            .args(restrictor.cli_args())
            .arg(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.bin))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("{} stdout not captured", self.bin))?;
        let mut stderr = child.stderr.take().ok_or_else(|| anyhow!("{} stderr not captured", self.bin))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = (&mut stderr).take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
            let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
            buf
        });

        let limit = self.max_output_bytes as u64;
        let mut out = Vec::new();
        stdout.take(limit.saturating_add(1)).read_to_end(&mut out).await.with_context(|| format!("reading {} output", self.bin))?;
        if out.len() as u64 > limit {
            if let Err(e) = child.kill().await {
                warn!(bin = %self.bin, error = %e, "failed to kill oversized build");
            }
            let _ = stderr_task.await;
            bail!("build output too large (>{} bytes)", self.max_output_bytes);
        }

        let status = child.wait().await.with_context(|| format!("waiting for {}", self.bin))?;
        let err_bytes = stderr_task.await.unwrap_or_default();
        if !status.success() {
            let stderr = String::from_utf8_lossy(&err_bytes);
            let msg = stderr.trim();
            if msg.is_empty() {
                bail!("{} exited with {}", self.bin, status);
            }
            bail!("{}", msg);
        }
        let text = std::str::from_utf8(&out).context("build output is not UTF-8")?;
        parse_manifest_stream(text)
    }
}

/// Parse a multi-document YAML stream into entries, skipping empty documents.
pub fn parse_manifest_stream(yaml: &str) -> Result<ResourceMap> {
    let mut map = ResourceMap::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing YAML document {}", i))?;
        if val.is_null() { continue; }
        let json = serde_json::to_value(val).with_context(|| format!("converting YAML document {} to JSON", i))?;
        let entry = ResourceEntry::from_json(json).map_err(|e| anyhow!("document {}: {}", i, e))?;
        map.push(entry);
    }
    Ok(map)
}
