use crate::metadata::ClusterMetadata;
use crate::prelude::*;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Extension key carrying the group/version/kind list on a schema node.
pub const GVK_EXTENSION: &str = "x-kubernetes-group-version-kind";
/// Extension key carrying the resource scope on a schema node.
pub const SCOPE_EXTENSION: &str = "x-scope";
/// Extension key carrying the categories a resource belongs to.
pub const CATEGORIES_EXTENSION: &str = "x-categories";
/// Top-level extension key carrying the connection descriptor.
pub const CLUSTER_METADATA_EXTENSION: &str = "x-cluster-metadata";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Definition key of this resource inside an artifact: the group segments
    /// reversed, then version, then kind. The core group reverses to the
    /// empty string, so its keys start with a dot (`.v1.Pod`).
    pub fn schema_key(&self) -> String {
        let reversed = reverse_group(&self.group);
        format!("{}.{}.{}", reversed, self.version, self.kind)
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

pub fn reverse_group(group: &str) -> String {
    if group.is_empty() {
        return String::new();
    }
    group.split('.').rev().collect::<Vec<_>>().join(".")
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    ClusterScoped,
}

impl Scope {
    pub fn is_namespaced(self) -> bool {
        matches!(self, Scope::Namespaced)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub title: String,
    pub version: String,
}

impl Default for ArtifactInfo {
    fn default() -> Self {
        ArtifactInfo {
            title: "Kubernetes".to_string(),
            version: "unversioned".to_string(),
        }
    }
}

/// The self-describing document bridging the listener and the gateway.
///
/// Syntactically an OpenAPI v2 document: `definitions` holds one schema node
/// per resource keyed by [`GroupVersionKind::schema_key`], and the reserved
/// `x-cluster-metadata` extension holds everything needed to reach the
/// cluster the definitions were discovered from. `BTreeMap` keeps the
/// serialized form stable so repeated pipeline runs produce identical bytes.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Artifact {
    pub swagger: String,
    pub info: ArtifactInfo,
    pub paths: BTreeMap<String, Value>,
    pub definitions: BTreeMap<String, Value>,
    #[serde(
        rename = "x-cluster-metadata",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub cluster_metadata: Option<ClusterMetadata>,
}

impl Artifact {
    pub fn new(definitions: BTreeMap<String, Value>) -> Self {
        Artifact {
            swagger: "2.0".to_string(),
            info: ArtifactInfo::default(),
            paths: BTreeMap::new(),
            definitions,
            cluster_metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ClusterMetadata) -> Self {
        self.cluster_metadata = Some(metadata);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec_pretty(self)?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact = serde_json::from_slice(bytes)?;
        Ok(artifact)
    }
}

/// All `x-kubernetes-group-version-kind` entries of a schema node. Missing or
/// malformed extensions yield an empty list.
pub fn gvk_entries(node: &Value) -> Vec<GroupVersionKind> {
    node.get(GVK_EXTENSION)
        .and_then(|v| serde_json::from_value::<Vec<GroupVersionKind>>(v.clone()).ok())
        .unwrap_or_default()
}

/// The node's GVK if it carries exactly one entry. Nodes with zero or more
/// than one entry are not addressable resources and resolve to `None`.
pub fn single_gvk(node: &Value) -> Option<GroupVersionKind> {
    let mut entries = gvk_entries(node);
    if entries.len() == 1 {
        entries.pop()
    } else {
        None
    }
}

pub fn set_gvk(node: &mut Value, gvk: &GroupVersionKind) {
    if let Some(obj) = node.as_object_mut() {
        obj.insert(GVK_EXTENSION.to_string(), json!([gvk]));
    }
}

pub fn node_scope(node: &Value) -> Option<Scope> {
    node.get(SCOPE_EXTENSION)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

pub fn set_scope(node: &mut Value, scope: Scope) {
    if let Some(obj) = node.as_object_mut() {
        obj.insert(SCOPE_EXTENSION.to_string(), json!(scope));
    }
}

pub fn node_categories(node: &Value) -> Vec<String> {
    node.get(CATEGORIES_EXTENSION)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

pub fn set_categories(node: &mut Value, categories: &[String]) {
    if categories.is_empty() {
        return;
    }
    if let Some(obj) = node.as_object_mut() {
        obj.insert(CATEGORIES_EXTENSION.to_string(), json!(categories));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_key_reverses_group_segments() {
        let gvk = GroupVersionKind::new("core.acme.io", "v1alpha1", "Account");
        assert_eq!(gvk.schema_key(), "io.acme.core.v1alpha1.Account");
    }

    #[test]
    fn schema_key_for_core_group_has_no_group_segments() {
        let gvk = GroupVersionKind::new("", "v1", "Pod");
        assert_eq!(gvk.schema_key(), ".v1.Pod");
    }

    #[test]
    fn single_gvk_requires_exactly_one_entry() {
        let one = json!({
            GVK_EXTENSION: [{"group": "apps", "version": "v1", "kind": "Deployment"}]
        });
        assert_eq!(
            single_gvk(&one),
            Some(GroupVersionKind::new("apps", "v1", "Deployment"))
        );

        let two = json!({
            GVK_EXTENSION: [
                {"group": "apps", "version": "v1", "kind": "Deployment"},
                {"group": "extensions", "version": "v1beta1", "kind": "Deployment"}
            ]
        });
        assert_eq!(single_gvk(&two), None);

        let none = json!({"type": "object"});
        assert_eq!(single_gvk(&none), None);
    }

    #[test]
    fn scope_round_trips_through_extension() {
        let mut node = json!({"type": "object"});
        set_scope(&mut node, Scope::Namespaced);
        assert_eq!(node[SCOPE_EXTENSION], json!("Namespaced"));
        assert_eq!(node_scope(&node), Some(Scope::Namespaced));

        set_scope(&mut node, Scope::ClusterScoped);
        assert_eq!(node_scope(&node), Some(Scope::ClusterScoped));
    }

    #[test]
    fn artifact_serialization_is_byte_stable() {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "io.acme.core.v1alpha1.Account".to_string(),
            json!({"type": "object"}),
        );
        definitions.insert(".v1.Pod".to_string(), json!({"type": "object"}));
        let artifact = Artifact::new(definitions);

        let first = artifact.to_bytes().expect("serialize");
        let second = artifact.to_bytes().expect("serialize");
        assert_eq!(first, second);

        let parsed = Artifact::from_bytes(&first).expect("parse");
        assert_eq!(parsed, artifact);
        assert_eq!(parsed.swagger, "2.0");
    }
}
