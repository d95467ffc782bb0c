use crate::errors::GatewayError;
use crate::names;
use crate::prelude::*;
use crate::resolvers::{self, resources_from_artifact, ResourceInfo};
use crate::subscriptions::{
    watch_events, Emission, SubscriptionFilter, SubscriptionMode,
};

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputObject, InputValue, Object, Scalar, Schema, Subscription,
    SubscriptionField, SubscriptionFieldFuture, TypeRef,
};
use async_graphql::Value as GqlValue;
use bifrost_core::artifact::Artifact;
use futures::StreamExt;
use kube::Client;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const STRING_MAP_SCALAR: &str = "StringMap";
const JSON_SCALAR: &str = "JSON";

/// A live GraphQL schema plus the resource table it was generated from.
pub struct SynthesizedSchema {
    pub schema: Schema,
    pub resources: Vec<Arc<ResourceInfo>>,
}

/// How a resolved field turns the parent's JSON into a GraphQL value.
#[derive(Debug, Clone)]
enum FieldShape {
    Scalar,
    Named(String),
    List(Box<FieldShape>),
}

fn resolve_shape(shape: &FieldShape, value: &Value) -> Option<FieldValue<'static>> {
    match shape {
        FieldShape::Scalar => GqlValue::from_json(value.clone()).ok().map(FieldValue::value),
        FieldShape::Named(_) => Some(FieldValue::owned_any(value.clone())),
        FieldShape::List(inner) => {
            let items = value.as_array()?;
            let values: Vec<FieldValue<'static>> = items
                .iter()
                .filter_map(|item| resolve_shape(inner, item))
                .collect();
            Some(FieldValue::list(values))
        }
    }
}

/// Generates object and input types for every definition of an artifact.
///
/// Type names are assigned up front (the placeholder phase); field
/// construction then references types by name only, so `$ref` cycles in the
/// definitions resolve against the reserved name instead of recursing.
struct TypeBuilder<'a> {
    definitions: &'a BTreeMap<String, Value>,
    key_names: HashMap<String, String>,
    used_names: HashSet<String>,
    outputs: Vec<Object>,
    inputs: Vec<InputObject>,
    built_outputs: HashSet<String>,
    built_inputs: HashSet<String>,
}

fn has_properties(node: &Value) -> bool {
    node.get("properties")
        .and_then(Value::as_object)
        .map(|props| !props.is_empty())
        .unwrap_or(false)
}

fn last_key_segment(key: &str) -> &str {
    key.rsplit('.').next().unwrap_or(key)
}

impl<'a> TypeBuilder<'a> {
    fn new(definitions: &'a BTreeMap<String, Value>, resources: &[Arc<ResourceInfo>]) -> Self {
        let mut builder = TypeBuilder {
            definitions,
            key_names: HashMap::new(),
            used_names: HashSet::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            built_outputs: HashSet::new(),
            built_inputs: HashSet::new(),
        };
        builder.assign_names(resources);
        builder
    }

    /// Phase one: reserve a stable GraphQL type name per definition key.
    /// Resources keep their precomputed (collision-aware) names; auxiliary
    /// definitions take their last key segment, falling back to the fully
    /// sanitized key.
    fn assign_names(&mut self, resources: &[Arc<ResourceInfo>]) {
        for resource in resources {
            self.key_names
                .insert(resource.schema_key.clone(), resource.type_name.clone());
            self.used_names.insert(resource.type_name.clone());
        }
        for (key, node) in self.definitions {
            if self.key_names.contains_key(key) || !has_properties(node) {
                continue;
            }
            let mut candidate = names::sanitize_identifier(last_key_segment(key));
            if self.used_names.contains(&candidate) {
                candidate = names::sanitize_identifier(key);
            }
            let mut unique = candidate.clone();
            let mut counter = 2;
            while self.used_names.contains(&unique) {
                unique = format!("{candidate}_{counter}");
                counter += 1;
            }
            self.used_names.insert(unique.clone());
            self.key_names.insert(key.clone(), unique);
        }
    }

    fn reserve_inline_name(&mut self, parent: &str, prop: &str) -> String {
        let candidate = names::sanitize_identifier(&format!("{parent}_{prop}"));
        let mut unique = candidate.clone();
        let mut counter = 2;
        while self.used_names.contains(&unique) && !self.built_outputs.contains(&unique) {
            unique = format!("{candidate}_{counter}");
            counter += 1;
        }
        unique
    }

    /// Phase two: build every named definition into an output object and an
    /// input object.
    fn build_all(&mut self) {
        let keys: Vec<(String, String)> = self
            .key_names
            .iter()
            .map(|(key, name)| (key.clone(), name.clone()))
            .collect();
        for (key, name) in keys {
            let node = self.definitions[&key].clone();
            self.build_output(&name, &node);
            self.build_input(&name, &node);
        }
    }

    fn build_output(&mut self, name: &str, node: &Value) {
        if !self.built_outputs.insert(name.to_string()) {
            return;
        }
        self.used_names.insert(name.to_string());
        let Some(properties) = node.get("properties").and_then(Value::as_object) else {
            // A structurally empty definition (preserve-unknown-fields CRDs)
            // still needs a registered type; expose the whole object as raw
            // JSON so references to it stay valid.
            let object = Object::new(name).field(Field::new(
                "raw",
                TypeRef::named(JSON_SCALAR),
                |ctx| {
                    FieldFuture::new(async move {
                        let Some(parent) = ctx.parent_value.downcast_ref::<Value>() else {
                            return Ok(None);
                        };
                        Ok(GqlValue::from_json(parent.clone()).ok().map(FieldValue::value))
                    })
                },
            ));
            self.outputs.push(object);
            return;
        };

        let mut object = Object::new(name);
        if let Some(description) = node.get("description").and_then(Value::as_str) {
            object = object.description(description);
        }
        for (prop, prop_node) in properties {
            let (type_ref, shape) = self.output_field(name, prop, prop_node);
            let field_name = prop.clone();
            let field = Field::new(prop, type_ref, move |ctx| {
                let field_name = field_name.clone();
                let shape = shape.clone();
                FieldFuture::new(async move {
                    let Some(parent) = ctx.parent_value.downcast_ref::<Value>() else {
                        return Ok(None);
                    };
                    let Some(child) = parent.get(&field_name) else {
                        return Ok(None);
                    };
                    if child.is_null() {
                        return Ok(None);
                    }
                    Ok(resolve_shape(&shape, child))
                })
            });
            let field = match prop_node.get("description").and_then(Value::as_str) {
                Some(description) => field.description(description),
                None => field,
            };
            object = object.field(field);
        }
        self.outputs.push(object);
    }

    fn output_field(&mut self, parent: &str, prop: &str, node: &Value) -> (TypeRef, FieldShape) {
        if node.get("type").and_then(Value::as_str) == Some("array") {
            let items = node.get("items").cloned().unwrap_or(Value::Null);
            let (inner, shape) = self.output_type_name(parent, prop, &items);
            return (
                TypeRef::named_list(inner),
                FieldShape::List(Box::new(shape)),
            );
        }
        let (name, shape) = self.output_type_name(parent, prop, node);
        (TypeRef::named(name), shape)
    }

    fn output_type_name(&mut self, parent: &str, prop: &str, node: &Value) -> (String, FieldShape) {
        if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
            let key = reference.trim_start_matches("#/definitions/");
            if let Some(name) = self.key_names.get(key).cloned() {
                return (name.clone(), FieldShape::Named(name));
            }
            return (JSON_SCALAR.to_string(), FieldShape::Scalar);
        }
        match node.get("type").and_then(Value::as_str) {
            Some("string") => (TypeRef::STRING.to_string(), FieldShape::Scalar),
            Some("boolean") => (TypeRef::BOOLEAN.to_string(), FieldShape::Scalar),
            Some("integer") => (TypeRef::INT.to_string(), FieldShape::Scalar),
            Some("number") => (TypeRef::FLOAT.to_string(), FieldShape::Scalar),
            Some("object") => {
                if is_string_map(node) {
                    return (STRING_MAP_SCALAR.to_string(), FieldShape::Scalar);
                }
                if has_properties(node) {
                    let name = self.reserve_inline_name(parent, prop);
                    self.build_output(&name, node);
                    return (name.clone(), FieldShape::Named(name));
                }
                (JSON_SCALAR.to_string(), FieldShape::Scalar)
            }
            _ => (JSON_SCALAR.to_string(), FieldShape::Scalar),
        }
    }

    fn build_input(&mut self, output_name: &str, node: &Value) {
        let input_name = format!("{output_name}Input");
        if !self.built_inputs.insert(input_name.clone()) {
            return;
        }
        let Some(properties) = node.get("properties").and_then(Value::as_object) else {
            let input = InputObject::new(&input_name)
                .field(InputValue::new("raw", TypeRef::named(JSON_SCALAR)));
            self.inputs.push(input);
            return;
        };

        let mut input = InputObject::new(&input_name);
        for (prop, prop_node) in properties {
            let type_ref = self.input_field(output_name, prop, prop_node);
            input = input.field(InputValue::new(prop, type_ref));
        }
        self.inputs.push(input);
    }

    fn input_field(&mut self, parent: &str, prop: &str, node: &Value) -> TypeRef {
        if node.get("type").and_then(Value::as_str) == Some("array") {
            let items = node.get("items").cloned().unwrap_or(Value::Null);
            let inner = self.input_type_name(parent, prop, &items);
            return TypeRef::named_list(inner);
        }
        let name = self.input_type_name(parent, prop, node);
        TypeRef::named(name)
    }

    fn input_type_name(&mut self, parent: &str, prop: &str, node: &Value) -> String {
        if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
            let key = reference.trim_start_matches("#/definitions/");
            if let Some(name) = self.key_names.get(key).cloned() {
                let target = self.definitions.get(key).cloned();
                if let Some(target) = target {
                    self.build_input(&name, &target);
                }
                return format!("{name}Input");
            }
            return JSON_SCALAR.to_string();
        }
        match node.get("type").and_then(Value::as_str) {
            Some("string") => TypeRef::STRING.to_string(),
            Some("boolean") => TypeRef::BOOLEAN.to_string(),
            Some("integer") => TypeRef::INT.to_string(),
            Some("number") => TypeRef::FLOAT.to_string(),
            Some("object") => {
                if is_string_map(node) {
                    return STRING_MAP_SCALAR.to_string();
                }
                if has_properties(node) {
                    let name = self.reserve_inline_name(parent, prop);
                    self.build_output(&name, node);
                    self.build_input(&name, node);
                    return format!("{name}Input");
                }
                JSON_SCALAR.to_string()
            }
            _ => JSON_SCALAR.to_string(),
        }
    }
}

/// A plain map of string values is exposed through a dedicated scalar
/// instead of a generated object type (labels, annotations, string data).
fn is_string_map(node: &Value) -> bool {
    if has_properties(node) {
        return false;
    }
    node.get("additionalProperties")
        .and_then(|ap| ap.get("type"))
        .and_then(Value::as_str)
        == Some("string")
}

fn client_from_ctx(ctx: &async_graphql::dynamic::ResolverContext<'_>) -> async_graphql::Result<Client> {
    Ok(ctx.data::<Client>()?.clone())
}

fn gql_error(err: GatewayError) -> async_graphql::Error {
    async_graphql::Error::new(err.to_string())
}

/// Builds the executable schema for one artifact: object/input types for
/// every definition, per-group query and mutation groups, and root
/// subscription fields.
pub fn synthesize(artifact: &Artifact) -> Result<SynthesizedSchema> {
    let resources = resources_from_artifact(artifact);
    let cluster_path = artifact
        .cluster_metadata
        .as_ref()
        .map(|meta| meta.path.clone())
        .unwrap_or_default();

    let mut types = TypeBuilder::new(&artifact.definitions, &resources);
    types.build_all();
    let TypeBuilder {
        outputs, inputs, ..
    } = types;

    // Group objects collect one field set per sanitized API group.
    let mut query_groups: BTreeMap<String, Object> = BTreeMap::new();
    let mut mutation_groups: BTreeMap<String, Object> = BTreeMap::new();
    let mut subscription = Subscription::new("Subscription");

    for resource in &resources {
        let group = resource.group_field.clone();
        let query_group = query_groups
            .remove(&group)
            .unwrap_or_else(|| Object::new(format!("{group}Query")));
        query_groups.insert(group.clone(), add_query_fields(query_group, resource));

        let mutation_group = mutation_groups
            .remove(&group)
            .unwrap_or_else(|| Object::new(format!("{group}Mutation")));
        mutation_groups.insert(group.clone(), add_mutation_fields(mutation_group, resource));

        subscription = add_subscription_fields(subscription, resource);
    }

    let mut query = Object::new("Query").field(Field::new(
        "clusterPath",
        TypeRef::named_nn(TypeRef::STRING),
        move |_ctx| {
            let cluster_path = cluster_path.clone();
            FieldFuture::new(async move { Ok(Some(FieldValue::value(cluster_path))) })
        },
    ));
    let mut mutation = Object::new("Mutation");
    for (group, object) in &query_groups {
        query = query.field(Field::new(
            group,
            TypeRef::named_nn(object.type_name().to_string()),
            |_ctx| FieldFuture::new(async move { Ok(Some(FieldValue::owned_any(()))) }),
        ));
    }
    for (group, object) in &mutation_groups {
        mutation = mutation.field(Field::new(
            group,
            TypeRef::named_nn(object.type_name().to_string()),
            |_ctx| FieldFuture::new(async move { Ok(Some(FieldValue::owned_any(()))) }),
        ));
    }

    let has_resources = !resources.is_empty();
    let mut builder = Schema::build(
        "Query",
        has_resources.then_some("Mutation"),
        has_resources.then_some("Subscription"),
    );
    builder = builder
        .register(Scalar::new(STRING_MAP_SCALAR).description("Map of string keys to string values"))
        .register(Scalar::new(JSON_SCALAR).description("Arbitrary JSON value"));
    for output in outputs {
        builder = builder.register(output);
    }
    for input in inputs {
        builder = builder.register(input);
    }
    for (_, object) in query_groups {
        builder = builder.register(object);
    }
    builder = builder.register(query);
    if has_resources {
        for (_, object) in mutation_groups {
            builder = builder.register(object);
        }
        builder = builder.register(mutation).register(subscription);
    }

    let schema = builder
        .finish()
        .map_err(|err| GatewayError::schema(err.to_string()))?;
    debug!("synthesized schema with {} resources", resources.len());
    Ok(SynthesizedSchema { schema, resources })
}

fn namespace_arg(ctx: &async_graphql::dynamic::ResolverContext<'_>) -> Option<String> {
    ctx.args
        .get("namespace")
        .and_then(|value| value.string().ok().map(str::to_string))
}

fn add_query_fields(group: Object, resource: &Arc<ResourceInfo>) -> Object {
    let single = {
        let resource_for_closure = resource.clone();
        let mut field = Field::new(
            resource.type_name.clone(),
            TypeRef::named(resource.type_name.clone()),
            move |ctx| {
                let resource = resource_for_closure.clone();
                FieldFuture::new(async move {
                    let client = client_from_ctx(&ctx)?;
                    let name = ctx.args.try_get("name")?.string()?.to_string();
                    let namespace = namespace_arg(&ctx);
                    let object =
                        resolvers::get(client, &resource, &name, namespace.as_deref())
                            .await
                            .map_err(gql_error)?;
                    Ok(Some(FieldValue::owned_any(object)))
                })
            },
        )
        .argument(InputValue::new("name", TypeRef::named_nn(TypeRef::STRING)));
        if resource.is_namespaced() {
            field = field.argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)));
        }
        field
    };

    let collection = {
        let resource_for_closure = resource.clone();
        let mut field = Field::new(
            names::pluralize(&resource.type_name),
            TypeRef::named_nn_list_nn(resource.type_name.clone()),
            move |ctx| {
                let resource = resource_for_closure.clone();
                FieldFuture::new(async move {
                    let client = client_from_ctx(&ctx)?;
                    let selector = ctx
                        .args
                        .get("labelselector")
                        .and_then(|value| value.string().ok().map(str::to_string));
                    let namespace = namespace_arg(&ctx);
                    let objects = resolvers::list(
                        client,
                        &resource,
                        namespace.as_deref(),
                        selector.as_deref(),
                    )
                    .await
                    .map_err(gql_error)?;
                    Ok(Some(FieldValue::list(
                        objects.into_iter().map(FieldValue::owned_any),
                    )))
                })
            },
        )
        .argument(InputValue::new(
            "labelselector",
            TypeRef::named(TypeRef::STRING),
        ));
        if resource.is_namespaced() {
            field = field.argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)));
        }
        field
    };

    group.field(single).field(collection)
}

fn add_mutation_fields(group: Object, resource: &Arc<ResourceInfo>) -> Object {
    let input_type = format!("{}Input", resource.type_name);

    let create = {
        let resource_for_closure = resource.clone();
        let mut field = Field::new(
            format!("create{}", resource.type_name),
            TypeRef::named(resource.type_name.clone()),
            move |ctx| {
                let resource = resource_for_closure.clone();
                FieldFuture::new(async move {
                    let client = client_from_ctx(&ctx)?;
                    let namespace = namespace_arg(&ctx);
                    let object: Value = ctx.args.try_get("object")?.deserialize()?;
                    let created =
                        resolvers::create(client, &resource, namespace.as_deref(), object)
                            .await
                            .map_err(gql_error)?;
                    Ok(Some(FieldValue::owned_any(created)))
                })
            },
        )
        .argument(InputValue::new("object", TypeRef::named_nn(input_type.clone())));
        if resource.is_namespaced() {
            field = field.argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)));
        }
        field
    };

    let update = {
        let resource_for_closure = resource.clone();
        let mut field = Field::new(
            format!("update{}", resource.type_name),
            TypeRef::named(resource.type_name.clone()),
            move |ctx| {
                let resource = resource_for_closure.clone();
                FieldFuture::new(async move {
                    let client = client_from_ctx(&ctx)?;
                    let namespace = namespace_arg(&ctx);
                    let object: Value = ctx.args.try_get("object")?.deserialize()?;
                    let updated =
                        resolvers::update(client, &resource, namespace.as_deref(), object)
                            .await
                            .map_err(gql_error)?;
                    Ok(Some(FieldValue::owned_any(updated)))
                })
            },
        )
        .argument(InputValue::new("object", TypeRef::named_nn(input_type)));
        if resource.is_namespaced() {
            field = field.argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)));
        }
        field
    };

    let delete = {
        let resource_for_closure = resource.clone();
        let mut field = Field::new(
            format!("delete{}", resource.type_name),
            TypeRef::named(TypeRef::BOOLEAN),
            move |ctx| {
                let resource = resource_for_closure.clone();
                FieldFuture::new(async move {
                    let client = client_from_ctx(&ctx)?;
                    let name = ctx.args.try_get("name")?.string()?.to_string();
                    let namespace = namespace_arg(&ctx);
                    let deleted =
                        resolvers::delete(client, &resource, &name, namespace.as_deref())
                            .await
                            .map_err(gql_error)?;
                    Ok(Some(FieldValue::value(deleted)))
                })
            },
        )
        .argument(InputValue::new("name", TypeRef::named_nn(TypeRef::STRING)));
        if resource.is_namespaced() {
            field = field.argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)));
        }
        field
    };

    group.field(create).field(update).field(delete)
}

fn subscription_filter(
    ctx: &async_graphql::dynamic::ResolverContext<'_>,
    single: bool,
) -> SubscriptionFilter {
    let name = single.then(|| {
        ctx.args
            .get("name")
            .and_then(|value| value.string().ok().map(str::to_string))
    });
    let label_selector = if single {
        None
    } else {
        ctx.args
            .get("labelselector")
            .and_then(|value| value.string().ok().map(str::to_string))
    };
    let field_paths = ctx
        .args
        .get("fieldPaths")
        .and_then(|value| value.list().ok())
        .map(|list| {
            list.iter()
                .filter_map(|item| item.string().ok().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    SubscriptionFilter {
        namespace: ctx
            .args
            .get("namespace")
            .and_then(|value| value.string().ok().map(str::to_string)),
        name: name.flatten(),
        label_selector,
        field_paths,
        emit_only_field_changes: ctx
            .args
            .get("emitOnlyFieldChanges")
            .and_then(|value| value.boolean().ok())
            .unwrap_or(false),
    }
}

fn emission_value(emission: Emission) -> FieldValue<'static> {
    match emission {
        Emission::Object(value) => FieldValue::owned_any(value),
        Emission::Snapshot(values) => {
            FieldValue::list(values.into_iter().map(FieldValue::owned_any))
        }
    }
}

fn add_subscription_fields(subscription: Subscription, resource: &Arc<ResourceInfo>) -> Subscription {
    let single = {
        let resource_for_closure = resource.clone();
        let mut field = SubscriptionField::new(
            format!("{}_{}", resource.group_field, resource.singular),
            TypeRef::named(resource.type_name.clone()),
            move |ctx| {
                let resource = resource_for_closure.clone();
                SubscriptionFieldFuture::new(async move {
                    let client = ctx.data::<Client>()?.clone();
                    let filter = subscription_filter(&ctx, true);
                    let stream = watch_events(
                        client,
                        resource,
                        filter,
                        SubscriptionMode::Single,
                    );
                    Ok(stream.map(|item| {
                        item.map(emission_value).map_err(|err| {
                            warn!("subscription stream error: {err:?}");
                            gql_error(err)
                        })
                    }))
                })
            },
        )
        .argument(InputValue::new("name", TypeRef::named(TypeRef::STRING)));
        if resource.is_namespaced() {
            field = field.argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)));
        }
        field
            .argument(InputValue::new(
                "emitOnlyFieldChanges",
                TypeRef::named(TypeRef::BOOLEAN),
            ))
            .argument(InputValue::new(
                "fieldPaths",
                TypeRef::named_list(TypeRef::STRING),
            ))
    };

    let collection = {
        let resource_for_closure = resource.clone();
        let mut field = SubscriptionField::new(
            format!("{}_{}", resource.group_field, resource.plural),
            TypeRef::named_nn_list_nn(resource.type_name.clone()),
            move |ctx| {
                let resource = resource_for_closure.clone();
                SubscriptionFieldFuture::new(async move {
                    let client = ctx.data::<Client>()?.clone();
                    let filter = subscription_filter(&ctx, false);
                    let stream = watch_events(
                        client,
                        resource,
                        filter,
                        SubscriptionMode::Collection,
                    );
                    Ok(stream.map(|item| {
                        item.map(emission_value).map_err(|err| {
                            warn!("subscription stream error: {err:?}");
                            gql_error(err)
                        })
                    }))
                })
            },
        )
        .argument(InputValue::new(
            "labelselector",
            TypeRef::named(TypeRef::STRING),
        ));
        if resource.is_namespaced() {
            field = field.argument(InputValue::new("namespace", TypeRef::named(TypeRef::STRING)));
        }
        field
            .argument(InputValue::new(
                "emitOnlyFieldChanges",
                TypeRef::named(TypeRef::BOOLEAN),
            ))
            .argument(InputValue::new(
                "fieldPaths",
                TypeRef::named_list(TypeRef::STRING),
            ))
    };

    subscription.field(single).field(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_core::metadata::ClusterMetadata;
    use http::{Request, Response, StatusCode};
    use kube::client::Body;
    use serde_json::json;
    use std::convert::Infallible;
    use tower::service_fn;

    fn pod_artifact() -> Artifact {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            ".v1.Pod".to_string(),
            json!({
                "type": "object",
                "description": "Pod is a collection of containers.",
                "properties": {
                    "metadata": {"$ref": "#/definitions/io.k8s.apimachinery.pkg.apis.meta.v1.ObjectMeta"},
                    "spec": {
                        "type": "object",
                        "properties": {
                            "nodeName": {"type": "string"},
                            "containers": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": {"type": "string"},
                                        "image": {"type": "string"}
                                    }
                                }
                            }
                        }
                    }
                },
                "x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "Pod"}],
                "x-scope": "Namespaced"
            }),
        );
        definitions.insert(
            "io.k8s.apimachinery.pkg.apis.meta.v1.ObjectMeta".to_string(),
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "namespace": {"type": "string"},
                    "labels": {
                        "type": "object",
                        "additionalProperties": {"type": "string"}
                    }
                }
            }),
        );
        Artifact::new(definitions)
            .with_metadata(ClusterMetadata::new("https://api.example", "kubernetes"))
    }

    fn pod_client() -> Client {
        let service = service_fn(|req: Request<Body>| async move {
            assert!(req
                .uri()
                .path()
                .starts_with("/api/v1/namespaces/default/pods/p"));
            let body = json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": "p",
                    "namespace": "default",
                    "labels": {"app": "demo"}
                },
                "spec": {
                    "nodeName": "node-1",
                    "containers": [{"name": "main", "image": "nginx"}]
                }
            });
            let response = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string().into_bytes()))
                .expect("response");
            Ok::<_, Infallible>(response)
        });
        Client::new(service, "default")
    }

    #[test]
    fn schema_exposes_groups_types_and_subscriptions() {
        let synthesized = synthesize(&pod_artifact()).expect("schema");
        let sdl = synthesized.schema.sdl();

        assert!(sdl.contains("type coreQuery"));
        assert!(sdl.contains("type coreMutation"));
        assert!(sdl.contains("type Pod "));
        assert!(sdl.contains("input PodInput"));
        assert!(sdl.contains("core_pod"));
        assert!(sdl.contains("core_pods"));
        assert!(sdl.contains("createPod"));
        assert!(sdl.contains("updatePod"));
        assert!(sdl.contains("deletePod"));
        assert!(sdl.contains("scalar StringMap"));
        assert!(sdl.contains("scalar JSON"));

        assert_eq!(synthesized.resources.len(), 1);
        assert_eq!(synthesized.resources[0].plural, "pods");
    }

    #[tokio::test]
    async fn pod_query_resolves_nested_fields_from_the_cluster() {
        let synthesized = synthesize(&pod_artifact()).expect("schema");
        let request = async_graphql::Request::new(
            r#"{
                core {
                    Pod(name: "p", namespace: "default") {
                        metadata { name labels }
                        spec {
                            nodeName
                            containers { name image }
                        }
                    }
                }
            }"#,
        )
        .data(pod_client());

        let response = synthesized.schema.execute(request).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);

        let data = response.data.into_json().expect("json");
        assert_eq!(data["core"]["Pod"]["metadata"]["name"], json!("p"));
        assert_eq!(
            data["core"]["Pod"]["metadata"]["labels"],
            json!({"app": "demo"})
        );
        assert_eq!(data["core"]["Pod"]["spec"]["nodeName"], json!("node-1"));
        assert_eq!(
            data["core"]["Pod"]["spec"]["containers"][0]["image"],
            json!("nginx")
        );
    }

    #[tokio::test]
    async fn query_without_client_data_reports_an_error() {
        let synthesized = synthesize(&pod_artifact()).expect("schema");
        let request =
            async_graphql::Request::new(r#"{ core { Pod(name: "p") { metadata { name } } } }"#);
        let response = synthesized.schema.execute(request).await;
        assert!(!response.errors.is_empty());
    }

    #[test]
    fn cluster_path_is_exposed_at_the_root() {
        let synthesized = synthesize(&pod_artifact()).expect("schema");
        let sdl = synthesized.schema.sdl();
        assert!(sdl.contains("clusterPath: String!"));
    }
}
