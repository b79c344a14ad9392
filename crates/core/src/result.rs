//! Final build result: id set, tiered ids, and canonical manifest bodies.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::id::identify_all;
use crate::{classify, CoreError, ResourceId, ResourceMap, TieredIds};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub ids: BTreeSet<ResourceId>,
    /// Exactly `Tier::COUNT` sets, lowest tier first.
    pub ids_prio: TieredIds,
    /// Canonical single-line JSON per id.
    pub manifests: BTreeMap<ResourceId, String>,
    /// Stable digest over ids and bodies.
    pub fingerprint: String,
}

impl BuildResult {
    /// Identify, classify and assemble in one pass over the map.
    pub fn from_resource_map(map: &ResourceMap) -> Result<Self, CoreError> {
        let ids = identify_all(map);
        let tiers = classify(map);
        assemble(map, &ids, tiers)
    }

    pub fn len(&self) -> usize { self.ids.len() }
    pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    pub fn manifest(&self, id: &ResourceId) -> Option<&str> { self.manifests.get(id).map(String::as_str) }
}

/// Package the derived ids and tiers with their bodies.
///
/// `ids` must be in the same order as `map`. A repeated id means the build produced two objects
/// with the same identity and is reported instead of silently keeping one body.
pub fn assemble(map: &ResourceMap, ids: &[ResourceId], ids_prio: TieredIds) -> Result<BuildResult, CoreError> {
    if ids.len() != map.len() {
        return Err(CoreError::Mismatch { ids: ids.len(), entries: map.len() });
    }
    let mut set = BTreeSet::new();
    let mut manifests = BTreeMap::new();
    for (id, entry) in ids.iter().zip(map.iter()) {
        if !set.insert(id.clone()) {
            return Err(CoreError::DuplicateId(id.to_string()));
        }
        manifests.insert(id.clone(), canonical_json(&entry.body));
    }
    if ids_prio.union() != set {
        return Err(CoreError::Mismatch { ids: ids_prio.len(), entries: set.len() });
    }
    let fingerprint = fingerprint(&manifests);
    Ok(BuildResult { ids: set, ids_prio, manifests, fingerprint })
}

/// Render JSON with object keys sorted at every level and no whitespace.
pub fn canonical_json(v: &Json) -> String {
    sorted(v).to_string()
}

fn sorted(v: &Json) -> Json {
    match v {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(map.len());
            for k in keys {
                out.insert(k.clone(), sorted(&map[k]));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn fingerprint(manifests: &BTreeMap<ResourceId, String>) -> String {
    let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
    let mut feed = |bytes: &[u8]| {
        for b in bytes { h ^= *b as u64; h = h.wrapping_mul(0x100000001b3); }
    };
    for (id, body) in manifests {
        feed(id.as_str().as_bytes());
        feed(&[0]);
        feed(body.as_bytes());
        feed(&[0]);
    }
    format!("{:016x}", h)
}
