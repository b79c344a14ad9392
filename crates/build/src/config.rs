//! Environment-driven build settings.

use std::path::PathBuf;

pub const DEFAULT_KUSTOMIZE_BIN: &str = "kustomize";
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;

pub fn kustomize_bin() -> String {
    std::env::var("STRATA_KUSTOMIZE_BIN")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_KUSTOMIZE_BIN.to_string())
}

pub fn max_output_bytes() -> usize {
    std::env::var("STRATA_MAX_OUTPUT_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_OUTPUT_BYTES) // 64 MiB default
}

/// Directory overlays are staged in; relative overlay paths resolve against it.
pub fn base_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("STRATA_BASE_DIR") {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub kustomize_bin: String,
    pub max_output_bytes: usize,
    pub base_dir: PathBuf,
}

impl BuildConfig {
    pub fn from_env() -> Self {
        Self { kustomize_bin: kustomize_bin(), max_output_bytes: max_output_bytes(), base_dir: base_dir() }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            kustomize_bin: DEFAULT_KUSTOMIZE_BIN.to_string(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            base_dir: PathBuf::from("."),
        }
    }
}
