//! Strata diff: compare two build results and order the changes by apply tier.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use strata_core::{BuildResult, ResourceId, Tier, TieredIds};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

impl DiffSummary {
    pub fn is_empty(&self) -> bool { self.adds == 0 && self.updates == 0 && self.removes == 0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChange {
    pub id: ResourceId,
    pub tier: Tier,
    pub summary: DiffSummary,
}

/// Changes between two builds. Ids inside each tier are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDiff {
    pub added: TieredIds,
    pub removed: TieredIds,
    pub changed: Vec<ManifestChange>,
    pub unchanged: usize,
}

impl ResultDiff {
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty() }

    /// Added and changed ids, tier 0 first.
    pub fn apply_order(&self) -> Vec<ResourceId> {
        let mut out = Vec::with_capacity(self.added.len() + self.changed.len());
        for tier in Tier::ALL {
            let mut ids: Vec<&ResourceId> = self.added.tier(tier).iter().collect();
            ids.extend(self.changed.iter().filter(|c| c.tier == tier).map(|c| &c.id));
            ids.sort();
            out.extend(ids.into_iter().cloned());
        }
        out
    }

    /// Removed ids, last tier first.
    pub fn delete_order(&self) -> Vec<ResourceId> {
        Tier::ALL.iter().rev().flat_map(|t| self.removed.tier(*t).iter().cloned()).collect()
    }
}

/// Compare `previous` against `next`. Server-populated fields are ignored when comparing bodies.
pub fn diff_results(previous: &BuildResult, next: &BuildResult) -> Result<ResultDiff> {
    let mut diff = ResultDiff::default();
    if !next.fingerprint.is_empty() && previous.fingerprint == next.fingerprint && previous.ids == next.ids {
        diff.unchanged = next.ids.len();
        return Ok(diff);
    }

    for id in &next.ids {
        let tier = next.ids_prio.tier_of(id).ok_or_else(|| anyhow!("{} has no tier in new result", id))?;
        let Some(before) = previous.manifest(id) else {
            diff.added.insert(tier, id.clone());
            continue;
        };
        let after = next.manifest(id).ok_or_else(|| anyhow!("{} has no manifest in new result", id))?;
        if before == after {
            diff.unchanged += 1;
            continue;
        }
        let before = parse_body(before).with_context(|| format!("previous manifest {}", id))?;
        let after = parse_body(after).with_context(|| format!("new manifest {}", id))?;
        let summary = diff_summary(&after, &before);
        if summary.is_empty() {
            diff.unchanged += 1;
        } else {
            diff.changed.push(ManifestChange { id: id.clone(), tier, summary });
        }
    }

    for id in previous.ids.difference(&next.ids) {
        let tier = previous.ids_prio.tier_of(id).unwrap_or(Tier::Default);
        diff.removed.insert(tier, id.clone());
    }

    debug!(
        added = diff.added.len(),
        removed = diff.removed.len(),
        changed = diff.changed.len(),
        unchanged = diff.unchanged,
        "result diff"
    );
    Ok(diff)
}

fn parse_body(s: &str) -> Result<Json> {
    let v: Json = serde_json::from_str(s).context("parsing manifest JSON")?;
    Ok(strip_noisy(v))
}

fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("generation");
        meta.remove("uid");
        // Rendered as `creationTimestamp: null` by most generators.
        meta.remove("creationTimestamp");
    }
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

/// Count keys added, values updated and keys removed going from `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                s.updates += aa.iter().zip(bb.iter()).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => { if av != bv { s.updates += 1; } }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
