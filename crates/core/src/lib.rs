//! Strata core types: manifest entries, resource ids, apply tiers and build results.

#![forbid(unsafe_code)]

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod id;
pub mod result;
pub mod tier;

pub use id::{ResourceId, ResourceIdParts, GROUP_SENTINEL, NAMESPACE_SENTINEL};
pub use result::{assemble, canonical_json, BuildResult};
pub use tier::{classify, Tier, TieredIds};

pub mod prelude {
    pub use super::{BuildResult, CoreError, ResourceEntry, ResourceId, ResourceMap, Tier, TieredIds};
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("manifest missing {0}")]
    MissingField(&'static str),
    #[error("invalid resource id: {0}")]
    InvalidId(String),
    #[error("duplicate resource id: {0}")]
    DuplicateId(String),
    #[error("identifier count {ids} does not match manifest count {entries}")]
    Mismatch { ids: usize, entries: usize },
}

/// One manifest produced by the build operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub gvk: GroupVersionKind,
    /// Empty for cluster-scoped resources.
    pub namespace: String,
    pub name: String,
    pub body: Json,
}

impl ResourceEntry {
    /// Read gvk/namespace/name out of a manifest body.
    pub fn from_json(body: Json) -> Result<Self, CoreError> {
        let api_version = body
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(CoreError::MissingField("apiVersion"))?;
        let kind = body
            .get("kind")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(CoreError::MissingField("kind"))?;
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", api_version),
        };
        let meta = body.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(CoreError::MissingField("metadata.name"))?
            .to_string();
        let namespace = meta
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let gvk = GroupVersionKind::gvk(group, version, kind);
        Ok(Self { gvk, namespace, name, body })
    }

    pub fn is_cluster_scoped(&self) -> bool { self.namespace.is_empty() }
}

/// Ordered manifests returned by one build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMap {
    entries: Vec<ResourceEntry>,
}

impl ResourceMap {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, entry: ResourceEntry) { self.entries.push(entry); }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceEntry> { self.entries.iter() }

    pub fn entries(&self) -> &[ResourceEntry] { &self.entries }
}

impl From<Vec<ResourceEntry>> for ResourceMap {
    fn from(entries: Vec<ResourceEntry>) -> Self { Self { entries } }
}

impl FromIterator<ResourceEntry> for ResourceMap {
    fn from_iter<I: IntoIterator<Item = ResourceEntry>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a ResourceMap {
    type Item = &'a ResourceEntry;
    type IntoIter = std::slice::Iter<'a, ResourceEntry>;
    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}
