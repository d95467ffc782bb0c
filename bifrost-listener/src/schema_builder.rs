use crate::discovery::{split_group_version, RestMapper};

use bifrost_core::artifact::{
    self, Artifact, GroupVersionKind, CATEGORIES_EXTENSION,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

const REF_SUFFIX: &str = "Ref";
const V3_REF_PREFIX: &str = "#/components/schemas/";
const V2_REF_PREFIX: &str = "#/definitions/";

/// Transforms per-path OpenAPI v3 documents into a stable v2 artifact.
///
/// Stages run in a fixed order: ingest, scope tagging, category annotation,
/// kind-registry build, relationship inference, serialization. Every stage
/// recovers from malformed single nodes by skipping them.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    max_relationship_depth: usize,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        SchemaBuilder {
            max_relationship_depth: 1,
        }
    }
}

impl SchemaBuilder {
    pub fn with_max_relationship_depth(mut self, depth: usize) -> Self {
        self.max_relationship_depth = depth.max(1);
        self
    }

    pub fn build(
        &self,
        documents: &[Value],
        preferred: &[APIResourceList],
        mapper: &RestMapper,
        extra_categories: &HashMap<String, Vec<String>>,
    ) -> Artifact {
        let mut definitions = ingest(documents);
        tag_scopes(&mut definitions, mapper);
        annotate_categories(&mut definitions, preferred, extra_categories);
        let registry = KindRegistry::from_definitions(&definitions, preferred);
        self.infer_relationships(&mut definitions, &registry);
        for node in definitions.values_mut() {
            strip_v3_keywords(node);
        }
        Artifact::new(definitions)
    }

    /// Stage 5: for every `fooRef` property, try to resolve the kind `Foo`.
    ///
    /// A unique provider gains a sibling `foo` property referencing the
    /// target schema. Multiple providers are a conflict: the `fooRef`
    /// property itself is rewritten to require `apiGroup` and `kind`
    /// discriminators. Nodes that are themselves relationship targets never
    /// receive relationship fields, which bounds graph expansion.
    fn infer_relationships(
        &self,
        definitions: &mut BTreeMap<String, Value>,
        registry: &KindRegistry,
    ) {
        let mut targets: HashSet<String> = HashSet::new();

        for _ in 0..self.max_relationship_depth {
            let mut additions: Vec<SiblingRef> = Vec::new();
            let mut conflicts: Vec<ConflictRewrite> = Vec::new();

            for (key, node) in definitions.iter() {
                let Some(properties) = node.get("properties").and_then(Value::as_object) else {
                    continue;
                };
                for (prop_name, _) in properties {
                    let Some(base) = prop_name.strip_suffix(REF_SUFFIX) else {
                        continue;
                    };
                    if base.is_empty() {
                        continue;
                    }
                    let candidates = registry.lookup(base);
                    match candidates.len() {
                        0 => {}
                        1 => {
                            let sibling = base.to_lowercase();
                            if properties.contains_key(&sibling) {
                                continue;
                            }
                            additions.push(SiblingRef {
                                host_key: key.clone(),
                                sibling,
                                target_key: candidates[0].schema_key.clone(),
                            });
                        }
                        _ => {
                            conflicts.push(ConflictRewrite {
                                host_key: key.clone(),
                                property: prop_name.clone(),
                                candidates: candidates
                                    .iter()
                                    .map(|c| c.gvk.clone())
                                    .collect(),
                            });
                        }
                    }
                }
            }

            let round_targets: HashSet<String> =
                additions.iter().map(|a| a.target_key.clone()).collect();
            targets.extend(round_targets);

            for addition in additions {
                if targets.contains(&addition.host_key) {
                    continue;
                }
                let Some(properties) = definitions
                    .get_mut(&addition.host_key)
                    .and_then(|node| node.get_mut("properties"))
                    .and_then(Value::as_object_mut)
                else {
                    continue;
                };
                properties.insert(
                    addition.sibling,
                    json!({"$ref": format!("{V2_REF_PREFIX}{}", addition.target_key)}),
                );
            }

            for conflict in conflicts {
                let Some(prop) = definitions
                    .get_mut(&conflict.host_key)
                    .and_then(|node| node.get_mut("properties"))
                    .and_then(|props| props.get_mut(&conflict.property))
                    .and_then(Value::as_object_mut)
                else {
                    continue;
                };
                rewrite_conflicting_reference(prop, &conflict.candidates);
            }
        }
    }
}

struct SiblingRef {
    host_key: String,
    sibling: String,
    target_key: String,
}

struct ConflictRewrite {
    host_key: String,
    property: String,
    candidates: Vec<GroupVersionKind>,
}

/// Stage 1: merge every document's schemas into one definitions map, rekeyed
/// by the resources' own GVKs. Last writer wins on collisions.
fn ingest(documents: &[Value]) -> BTreeMap<String, Value> {
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    for document in documents {
        let Some(schemas) = document
            .pointer("/components/schemas")
            .and_then(Value::as_object)
        else {
            warn!("document without components.schemas, skipping");
            continue;
        };
        for (key, node) in schemas {
            if merged.insert(key.clone(), node.clone()).is_some() {
                debug!("definition {key} provided by multiple documents, keeping last");
            }
        }
    }

    // Addressable resources are rekeyed to their canonical schema key so the
    // artifact is stable regardless of the server's own naming.
    let mut renames: HashMap<String, String> = HashMap::new();
    for (key, node) in &merged {
        if let Some(gvk) = artifact::single_gvk(node) {
            let canonical = gvk.schema_key();
            if canonical != *key {
                renames.insert(key.clone(), canonical);
            }
        }
    }

    let mut definitions: BTreeMap<String, Value> = BTreeMap::new();
    for (key, node) in merged {
        let key = renames.get(&key).cloned().unwrap_or(key);
        if definitions.insert(key.clone(), node).is_some() {
            debug!("definition {key} collided after rekeying, keeping last");
        }
    }

    for node in definitions.values_mut() {
        rewrite_refs(node, &renames);
    }
    definitions
}

/// Stage 2: annotate `x-scope` on every node with exactly one GVK the REST
/// mapper knows about.
fn tag_scopes(definitions: &mut BTreeMap<String, Value>, mapper: &RestMapper) {
    for (key, node) in definitions.iter_mut() {
        let Some(gvk) = artifact::single_gvk(node) else {
            continue;
        };
        match mapper.scope_for(&gvk) {
            Some(scope) => artifact::set_scope(node, scope),
            None => debug!("no REST mapping for {gvk} ({key}), leaving scope untagged"),
        }
    }
}

/// Stage 3: copy categories from the preferred resource lists onto the
/// matching nodes; explicitly supplied categories win.
fn annotate_categories(
    definitions: &mut BTreeMap<String, Value>,
    preferred: &[APIResourceList],
    extra_categories: &HashMap<String, Vec<String>>,
) {
    for list in preferred {
        let (group, version) = split_group_version(&list.group_version);
        for resource in &list.resources {
            if resource.name.contains('/') {
                continue;
            }
            let Some(categories) = resource.categories.as_ref().filter(|c| !c.is_empty()) else {
                continue;
            };
            let key = GroupVersionKind::new(group, version, &resource.kind).schema_key();
            if let Some(node) = definitions.get_mut(&key) {
                artifact::set_categories(node, categories);
            }
        }
    }
    for (key, categories) in extra_categories {
        if let Some(node) = definitions.get_mut(key) {
            if let Some(obj) = node.as_object_mut() {
                obj.insert(CATEGORIES_EXTENSION.to_string(), json!(categories));
            }
        }
    }
}

/// Stage 4 output: kinds indexed case-insensitively across all addressable
/// resources of the artifact.
pub(crate) struct KindRegistry {
    by_kind: HashMap<String, Vec<KindEntry>>,
}

#[derive(Debug, Clone)]
pub(crate) struct KindEntry {
    pub gvk: GroupVersionKind,
    pub schema_key: String,
    pub preferred: bool,
}

impl KindRegistry {
    pub(crate) fn from_definitions(
        definitions: &BTreeMap<String, Value>,
        preferred: &[APIResourceList],
    ) -> Self {
        let preferred_set: HashSet<(String, String)> = preferred
            .iter()
            .map(|list| {
                let (group, version) = split_group_version(&list.group_version);
                (group.to_string(), version.to_string())
            })
            .collect();

        let mut by_kind: HashMap<String, Vec<KindEntry>> = HashMap::new();
        for (key, node) in definitions {
            let Some(gvk) = artifact::single_gvk(node) else {
                continue;
            };
            let entry = KindEntry {
                preferred: preferred_set
                    .contains(&(gvk.group.clone(), gvk.version.clone())),
                schema_key: key.clone(),
                gvk,
            };
            by_kind
                .entry(entry.gvk.kind.to_lowercase())
                .or_default()
                .push(entry);
        }
        for entries in by_kind.values_mut() {
            entries.sort_by(candidate_order);
        }
        KindRegistry { by_kind }
    }

    pub(crate) fn lookup(&self, kind: &str) -> &[KindEntry] {
        self.by_kind
            .get(&kind.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Deterministic candidate ordering: preferred versions first, then core
/// group before `k8s.io` groups before the rest, then version stability,
/// then schema key.
pub(crate) fn candidate_order(a: &KindEntry, b: &KindEntry) -> Ordering {
    b.preferred
        .cmp(&a.preferred)
        .then_with(|| group_class(&a.gvk.group).cmp(&group_class(&b.gvk.group)))
        .then_with(|| version_rank(&b.gvk.version).cmp(&version_rank(&a.gvk.version)))
        .then_with(|| a.schema_key.cmp(&b.schema_key))
}

fn group_class(group: &str) -> u8 {
    if group.is_empty() {
        0
    } else if group == "k8s.io" || group.ends_with(".k8s.io") {
        1
    } else {
        2
    }
}

/// Rank of a Kubernetes API version: stable releases outrank betas, betas
/// outrank alphas, higher numbers outrank lower. Unparseable versions rank
/// lowest.
fn version_rank(version: &str) -> (u8, u64, u64) {
    let Some(rest) = version.strip_prefix('v') else {
        return (0, 0, 0);
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let Ok(major) = digits.parse::<u64>() else {
        return (0, 0, 0);
    };
    let suffix = &rest[digits.len()..];
    if suffix.is_empty() {
        return (3, major, 0);
    }
    if let Some(minor) = suffix.strip_prefix("beta") {
        return (2, major, minor.parse().unwrap_or(0));
    }
    if let Some(minor) = suffix.strip_prefix("alpha") {
        return (1, major, minor.parse().unwrap_or(0));
    }
    (0, 0, 0)
}

fn rewrite_conflicting_reference(prop: &mut Map<String, Value>, candidates: &[GroupVersionKind]) {
    let listing = candidates
        .iter()
        .map(|gvk| format!("{}/{}", gvk.group, gvk.version))
        .collect::<Vec<_>>()
        .join(", ");
    let kind = candidates
        .first()
        .map(|gvk| gvk.kind.clone())
        .unwrap_or_default();
    let note = format!(
        "Multiple API groups provide kind {kind} ({listing}); set apiGroup and kind to select one."
    );

    let description = match prop.get("description").and_then(Value::as_str) {
        Some(existing) if !existing.is_empty() => format!("{existing} {note}"),
        _ => note,
    };
    prop.insert("description".to_string(), json!(description));

    let properties = prop
        .entry("properties".to_string())
        .or_insert_with(|| json!({}));
    if let Some(properties) = properties.as_object_mut() {
        properties
            .entry("apiGroup".to_string())
            .or_insert_with(|| json!({"type": "string"}));
        properties
            .entry("kind".to_string())
            .or_insert_with(|| json!({"type": "string"}));
    }
    prop.insert("required".to_string(), json!(["apiGroup", "kind"]));
}

/// Rewrites `$ref` values to v2 form, applying the rekeying map.
fn rewrite_refs(node: &mut Value, renames: &HashMap<String, String>) {
    match node {
        Value::Object(obj) => {
            if let Some(Value::String(reference)) = obj.get_mut("$ref") {
                let target = reference
                    .strip_prefix(V3_REF_PREFIX)
                    .or_else(|| reference.strip_prefix(V2_REF_PREFIX));
                if let Some(target) = target {
                    let renamed = renames.get(target).map(String::as_str).unwrap_or(target);
                    *reference = format!("{V2_REF_PREFIX}{renamed}");
                }
            }
            for value in obj.values_mut() {
                rewrite_refs(value, renames);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_refs(item, renames);
            }
        }
        _ => {}
    }
}

/// Drops OpenAPI v3-only keywords the v2 artifact must not carry.
fn strip_v3_keywords(node: &mut Value) {
    match node {
        Value::Object(obj) => {
            obj.remove("nullable");
            for value in obj.values_mut() {
                strip_v3_keywords(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_v3_keywords(item);
            }
        }
        _ => {}
    }
}
