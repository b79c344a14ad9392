//! Strata compose: turn loosely typed overlay attributes into a typed `BuildSpec`.
//!
//! The attribute names mirror the overlay data source (`common_labels`, `config_map_generator`,
//! `patches { target { label_selector } }`, ...). Composition never fails: absent or mistyped
//! attributes become empty fields, null blocks are skipped, and declared order is kept so
//! generator precedence and patch order reach the build unchanged. Nothing here checks paths or
//! behaviors; the build reports those.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};
use tracing::debug;

pub mod spec;

pub use spec::{BuildSpec, GeneratorBehavior, GeneratorSpec, ImageOverride, PatchSpec, PatchTarget, ReplicaOverride};

/// Build a `BuildSpec` from an attribute object. Non-object input yields an empty spec.
pub fn compose(attrs: &Json) -> BuildSpec {
    let spec = BuildSpec {
        common_annotations: str_map(attrs, "common_annotations"),
        common_labels: str_map(attrs, "common_labels"),
        components: str_list(attrs, "components"),
        config_map_generator: blocks(attrs, "config_map_generator").map(|b| generator(b, false)).collect(),
        crds: str_list(attrs, "crds"),
        images: blocks(attrs, "images").map(image).collect(),
        name_prefix: str_attr(attrs, "name_prefix"),
        name_suffix: str_attr(attrs, "name_suffix"),
        namespace: str_attr(attrs, "namespace"),
        replicas: blocks(attrs, "replicas").map(replica).collect(),
        resources: str_list(attrs, "resources"),
        secret_generator: blocks(attrs, "secret_generator").map(|b| generator(b, true)).collect(),
        patches: blocks(attrs, "patches").map(patch).collect(),
    };
    debug!(
        resources = spec.resources.len(),
        components = spec.components.len(),
        generators = spec.config_map_generator.len() + spec.secret_generator.len(),
        patches = spec.patches.len(),
        "overlay composed"
    );
    spec
}

fn generator(b: &Map<String, Json>, secret: bool) -> GeneratorSpec {
    GeneratorSpec {
        name: field_str(b, "name"),
        behavior: GeneratorBehavior::from(field_str(b, "behavior").as_str()),
        secret_type: if secret { field_opt(b, "type") } else { None },
        envs: field_list(b, "envs"),
        files: field_list(b, "files"),
        literals: field_list(b, "literals"),
    }
}

fn image(b: &Map<String, Json>) -> ImageOverride {
    ImageOverride {
        name: field_str(b, "name"),
        new_name: field_opt(b, "new_name"),
        new_tag: field_opt(b, "new_tag"),
        digest: field_opt(b, "digest"),
    }
}

fn replica(b: &Map<String, Json>) -> ReplicaOverride {
    let count = match b.get("count") {
        Some(Json::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Json::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    ReplicaOverride { name: field_str(b, "name"), count }
}

fn patch(b: &Map<String, Json>) -> PatchSpec {
    let target = b
        .get("target")
        .and_then(|t| t.as_object())
        .map(|t| PatchTarget {
            group: field_opt(t, "group"),
            version: field_opt(t, "version"),
            kind: field_opt(t, "kind"),
            name: field_opt(t, "name"),
            namespace: field_opt(t, "namespace"),
            label_selector: field_opt(t, "label_selector"),
            annotation_selector: field_opt(t, "annotation_selector"),
        })
        .filter(|t| !t.is_empty());
    PatchSpec { path: field_opt(b, "path"), patch: field_opt(b, "patch"), target }
}

// ---- attribute access ----

/// Strings pass through; bools and numbers are rendered the way they were written.
fn scalar(v: &Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s.clone()),
        Json::Bool(b) => Some(b.to_string()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_attr(attrs: &Json, key: &str) -> String {
    attrs.get(key).and_then(scalar).unwrap_or_default()
}

fn str_list(attrs: &Json, key: &str) -> Vec<String> {
    match attrs.get(key) {
        Some(Json::Array(items)) => items.iter().filter_map(scalar).collect(),
        _ => Vec::new(),
    }
}

fn str_map(attrs: &Json, key: &str) -> BTreeMap<String, String> {
    match attrs.get(key) {
        Some(Json::Object(m)) => m.iter().filter_map(|(k, v)| scalar(v).map(|s| (k.clone(), s))).collect(),
        _ => BTreeMap::new(),
    }
}

/// Repeated blocks in declared order. A lone object counts as a single block.
fn blocks<'a>(attrs: &'a Json, key: &str) -> Box<dyn Iterator<Item = &'a Map<String, Json>> + 'a> {
    match attrs.get(key) {
        Some(Json::Array(items)) => Box::new(items.iter().filter_map(|i| i.as_object())),
        Some(Json::Object(m)) => Box::new(std::iter::once(m)),
        _ => Box::new(std::iter::empty()),
    }
}

fn field_str(b: &Map<String, Json>, key: &str) -> String {
    b.get(key).and_then(scalar).unwrap_or_default()
}

fn field_opt(b: &Map<String, Json>, key: &str) -> Option<String> {
    b.get(key).and_then(scalar).filter(|s| !s.is_empty())
}

fn field_list(b: &Map<String, Json>, key: &str) -> Vec<String> {
    match b.get(key) {
        Some(Json::Array(items)) => items.iter().filter_map(scalar).collect(),
        _ => Vec::new(),
    }
}
