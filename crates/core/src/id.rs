//! Canonical resource identifiers.
//!
//! An id renders as `<group>_<version>_<kind>|<namespace>|<name>`. The core API group and the
//! cluster scope have no name of their own, so they are written as `~G` and `~X`. This keeps every
//! field non-empty, which makes ids parseable and gives a total lexicographic order in which
//! cluster-scoped and namespaced objects stay distinct.

use std::fmt;
use std::str::FromStr;

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};

use crate::{CoreError, ResourceEntry, ResourceMap};

/// Stands in for the empty core API group.
pub const GROUP_SENTINEL: &str = "~G";
/// Stands in for the empty namespace of cluster-scoped resources.
pub const NAMESPACE_SENTINEL: &str = "~X";

const FIELD_SEP: char = '|';
const GVK_SEP: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

/// Fields recovered from a parsed id; sentinels are mapped back to empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdParts {
    pub gvk: GroupVersionKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn from_entry(entry: &ResourceEntry) -> Self {
        Self::from_parts(&entry.gvk, &entry.namespace, &entry.name)
    }

    pub fn from_parts(gvk: &GroupVersionKind, namespace: &str, name: &str) -> Self {
        let group = if gvk.group.is_empty() { GROUP_SENTINEL } else { gvk.group.as_str() };
        let namespace = if namespace.is_empty() { NAMESPACE_SENTINEL } else { namespace };
        Self(format!(
            "{group}{GVK_SEP}{}{GVK_SEP}{}{FIELD_SEP}{namespace}{FIELD_SEP}{name}",
            gvk.version, gvk.kind
        ))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn into_string(self) -> String { self.0 }

    /// Split an id back into gvk, namespace and name.
    pub fn parts(&self) -> Result<ResourceIdParts, CoreError> { parse_parts(&self.0) }

    /// Parse a rendered id straight into its fields.
    pub fn parse(s: &str) -> Result<ResourceIdParts, CoreError> { parse_parts(s) }
}

fn parse_parts(s: &str) -> Result<ResourceIdParts, CoreError> {
    let invalid = || CoreError::InvalidId(s.to_string());
    let fields: Vec<&str> = s.split(FIELD_SEP).collect();
    let &[gvk_token, namespace, name] = fields.as_slice() else { return Err(invalid()) };
    if namespace.is_empty() || name.is_empty() { return Err(invalid()); }

    // Group names are DNS subdomains and never contain '_', so split from the right.
    let mut rev = gvk_token.rsplitn(3, GVK_SEP);
    let (kind, version, group) = match (rev.next(), rev.next(), rev.next()) {
        (Some(k), Some(v), Some(g)) if !k.is_empty() && !v.is_empty() && !g.is_empty() => (k, v, g),
        _ => return Err(invalid()),
    };
    let group = if group == GROUP_SENTINEL { "" } else { group };
    let namespace = if namespace == NAMESPACE_SENTINEL { "" } else { namespace };
    Ok(ResourceIdParts {
        gvk: GroupVersionKind::gvk(group, version, kind),
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

impl FromStr for ResourceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_parts(s)?;
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str { &self.0 }
}

/// Identify every entry, preserving map order.
pub fn identify_all(map: &ResourceMap) -> Vec<ResourceId> {
    map.iter().map(ResourceId::from_entry).collect()
}
