//! Typed Kustomization document built from overlay attributes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Serialize, Serializer};

pub const KUSTOMIZATION_API_VERSION: &str = "kustomize.config.k8s.io/v1beta1";
pub const KUSTOMIZATION_KIND: &str = "Kustomization";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub common_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_map_generator: Vec<GeneratorSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub crds: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageOverride>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_suffix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replicas: Vec<ReplicaOverride>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secret_generator: Vec<GeneratorSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchSpec>,
}

/// How a generated object combines with one of the same name from a base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeneratorBehavior {
    #[default]
    Unspecified,
    Create,
    Replace,
    Merge,
    /// Passed through untouched; the build rejects it.
    Unknown(String),
}

impl GeneratorBehavior {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unspecified => "",
            Self::Create => "create",
            Self::Replace => "replace",
            Self::Merge => "merge",
            Self::Unknown(s) => s,
        }
    }

    pub fn is_unspecified(&self) -> bool { matches!(self, Self::Unspecified) }
}

impl From<&str> for GeneratorBehavior {
    fn from(s: &str) -> Self {
        match s {
            "" => Self::Unspecified,
            "create" => Self::Create,
            "replace" => Self::Replace,
            "merge" => Self::Merge,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Serialize for GeneratorBehavior {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.serialize_str(self.as_str()) }
}

/// ConfigMap or Secret generator arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeneratorSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "GeneratorBehavior::is_unspecified")]
    pub behavior: GeneratorBehavior,
    /// Secret type; only meaningful for secret generators.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub literals: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOverride {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicaOverride {
    pub name: String,
    pub count: i64,
}

/// Either `patch` (inline) or `path` is expected; the build reports specs with both or neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PatchTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation_selector: Option<String>,
}

impl PatchTarget {
    pub fn is_empty(&self) -> bool { self == &Self::default() }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document<'a> {
    api_version: &'static str,
    kind: &'static str,
    #[serde(flatten)]
    spec: &'a BuildSpec,
}

impl BuildSpec {
    /// Render the Kustomization YAML handed to the build.
    pub fn to_yaml(&self) -> Result<String> {
        let doc = Document { api_version: KUSTOMIZATION_API_VERSION, kind: KUSTOMIZATION_KIND, spec: self };
        serde_yaml::to_string(&doc).context("serializing Kustomization")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_renders_type_meta_only() {
        let y = BuildSpec::default().to_yaml().unwrap();
        assert_eq!(y, "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\n");
    }

    #[test]
    fn field_names_follow_kustomize() {
        let spec = BuildSpec {
            name_prefix: "test-".into(),
            config_map_generator: vec![GeneratorSpec {
                name: "cm".into(),
                behavior: GeneratorBehavior::Merge,
                literals: vec!["KEY1=VALUE1".into()],
                ..Default::default()
            }],
            secret_generator: vec![GeneratorSpec {
                name: "s".into(),
                secret_type: Some("Opaque".into()),
                ..Default::default()
            }],
            images: vec![ImageOverride { name: "nginx".into(), new_tag: Some("1.25".into()), ..Default::default() }],
            patches: vec![PatchSpec {
                path: Some("patch.yaml".into()),
                target: Some(PatchTarget { label_selector: Some("app=test".into()), ..Default::default() }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let v: serde_yaml::Value = serde_yaml::from_str(&spec.to_yaml().unwrap()).unwrap();
        assert_eq!(v["kind"].as_str(), Some("Kustomization"));
        assert_eq!(v["namePrefix"].as_str(), Some("test-"));
        assert_eq!(v["configMapGenerator"][0]["behavior"].as_str(), Some("merge"));
        assert_eq!(v["secretGenerator"][0]["type"].as_str(), Some("Opaque"));
        assert!(v["secretGenerator"][0].get("behavior").is_none());
        assert_eq!(v["images"][0]["newTag"].as_str(), Some("1.25"));
        assert!(v["images"][0].get("newName").is_none());
        assert_eq!(v["patches"][0]["target"]["labelSelector"].as_str(), Some("app=test"));
        assert!(v.get("resources").is_none());
    }

    #[test]
    fn unknown_behavior_passes_through() {
        let b = GeneratorBehavior::from("upsert");
        assert_eq!(b, GeneratorBehavior::Unknown("upsert".into()));
        assert_eq!(b.as_str(), "upsert");
    }
}
