//! Apply-order tiers.

use std::collections::BTreeSet;

use k8s_openapi::api::admissionregistration::v1::{MutatingWebhookConfiguration, ValidatingWebhookConfiguration};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::Resource;
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};

use crate::{ResourceId, ResourceMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Scope-establishing kinds other objects need to exist first.
    First = 0,
    Default = 1,
    /// Admission webhooks; applied once everything they could gate is in place.
    Last = 2,
}

impl Tier {
    pub const COUNT: usize = 3;
    pub const ALL: [Tier; Tier::COUNT] = [Tier::First, Tier::Default, Tier::Last];

    pub fn index(self) -> usize { self as usize }

    pub fn for_gvk(gvk: &GroupVersionKind) -> Tier {
        if is::<Namespace>(gvk) || is::<CustomResourceDefinition>(gvk) {
            Tier::First
        } else if is::<MutatingWebhookConfiguration>(gvk) || is::<ValidatingWebhookConfiguration>(gvk) {
            Tier::Last
        } else {
            Tier::Default
        }
    }
}

// Version is ignored so v1beta1 CRDs and webhooks land in the same tier.
fn is<K: Resource>(gvk: &GroupVersionKind) -> bool {
    gvk.group == K::GROUP && gvk.kind == K::KIND
}

/// Ids grouped by tier, in ascending apply order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TieredIds([BTreeSet<ResourceId>; Tier::COUNT]);

impl TieredIds {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, tier: Tier, id: ResourceId) -> bool { self.0[tier.index()].insert(id) }

    pub fn tier(&self, tier: Tier) -> &BTreeSet<ResourceId> { &self.0[tier.index()] }

    pub fn tier_of(&self, id: &ResourceId) -> Option<Tier> {
        Tier::ALL.into_iter().find(|t| self.tier(*t).contains(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tier, &BTreeSet<ResourceId>)> + '_ {
        Tier::ALL.into_iter().map(move |t| (t, self.tier(t)))
    }

    pub fn len(&self) -> usize { self.0.iter().map(BTreeSet::len).sum() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn union(&self) -> BTreeSet<ResourceId> {
        self.0.iter().flatten().cloned().collect()
    }

    pub fn into_vec(self) -> Vec<BTreeSet<ResourceId>> { self.0.into() }
}

/// Partition the ids of a build into tiers.
pub fn classify(map: &ResourceMap) -> TieredIds {
    let mut tiers = TieredIds::new();
    for entry in map {
        tiers.insert(Tier::for_gvk(&entry.gvk), ResourceId::from_entry(entry));
    }
    tiers
}
