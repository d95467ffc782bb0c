use crate::errors::GatewayError;
use crate::names;
use crate::prelude::*;

use bifrost_core::artifact::{self, Artifact, GroupVersionKind, Scope};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind as KubeGvk, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Everything the runtime needs to address one resource of an artifact.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub gvk: GroupVersionKind,
    pub schema_key: String,
    pub scope: Scope,
    pub singular: String,
    pub plural: String,
    /// Sanitized group, the field name of the resource's query group.
    pub group_field: String,
    /// GraphQL type name; carries a group/version suffix on kind collisions.
    pub type_name: String,
}

impl ResourceInfo {
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &KubeGvk::gvk(&self.gvk.group, &self.gvk.version, &self.gvk.kind),
            &self.plural,
        )
    }

    pub fn api(&self, client: Client, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = self.api_resource();
        match self.scope {
            Scope::Namespaced => {
                let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
                Api::namespaced_with(client, namespace, &resource)
            }
            Scope::ClusterScoped => Api::all_with(client, &resource),
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.scope.is_namespaced()
    }
}

/// Extracts the addressable resources of an artifact: every definition with
/// exactly one GVK. Kind collisions across groups get disambiguated type
/// names; scope defaults to namespaced when the artifact carries no tag.
pub fn resources_from_artifact(artifact: &Artifact) -> Vec<Arc<ResourceInfo>> {
    let mut kind_counts: HashMap<String, usize> = HashMap::new();
    let mut found: Vec<(String, GroupVersionKind, Scope)> = Vec::new();

    for (key, node) in &artifact.definitions {
        let Some(gvk) = artifact::single_gvk(node) else {
            continue;
        };
        let scope = artifact::node_scope(node).unwrap_or(Scope::Namespaced);
        *kind_counts.entry(gvk.kind.to_lowercase()).or_default() += 1;
        found.push((key.clone(), gvk, scope));
    }

    found
        .into_iter()
        .map(|(schema_key, gvk, scope)| {
            let collides = kind_counts[&gvk.kind.to_lowercase()] > 1;
            let type_name = if collides {
                format!(
                    "{}_{}",
                    names::sanitize_identifier(&gvk.kind),
                    names::collision_suffix(&gvk.group, &gvk.version)
                )
            } else {
                names::sanitize_identifier(&gvk.kind)
            };
            let singular = gvk.kind.to_lowercase();
            Arc::new(ResourceInfo {
                group_field: names::sanitize_group(&gvk.group),
                plural: names::pluralize(&singular),
                singular,
                scope,
                schema_key,
                type_name,
                gvk,
            })
        })
        .collect()
}

fn to_value(object: DynamicObject) -> Result<Value> {
    let value = serde_json::to_value(object).map_err(crate::errors::ErrorKind::from)?;
    Ok(value)
}

/// `Get`: the full unstructured object; field selection happens lazily in
/// the GraphQL layer.
pub async fn get(
    client: Client,
    resource: &ResourceInfo,
    name: &str,
    namespace: Option<&str>,
) -> Result<Value> {
    let api = resource.api(client, namespace);
    let object = api.get(name).await?;
    to_value(object)
}

pub async fn list(
    client: Client,
    resource: &ResourceInfo,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<Value>> {
    let api = resource.api(client, namespace);
    let mut params = ListParams::default();
    if let Some(selector) = label_selector {
        params = params.labels(selector);
    }
    let objects = api.list(&params).await?;
    objects.items.into_iter().map(to_value).collect()
}

/// `Create`: the object is stamped with the resource's apiVersion and kind
/// so callers only supply the payload.
pub async fn create(
    client: Client,
    resource: &ResourceInfo,
    namespace: Option<&str>,
    mut object: Value,
) -> Result<Value> {
    if let Some(map) = object.as_object_mut() {
        map.insert("apiVersion".to_string(), json!(resource.gvk.api_version()));
        map.insert("kind".to_string(), json!(resource.gvk.kind));
    }
    let object: DynamicObject =
        serde_json::from_value(object).map_err(crate::errors::ErrorKind::from)?;
    let api = resource.api(client, namespace);
    let created = api.create(&PostParams::default(), &object).await?;
    to_value(created)
}

/// `Update`: RFC 7396 merge-patch semantics. The current object is fetched
/// first so a missing target surfaces as a not-found error instead of an
/// implicit create.
pub async fn update(
    client: Client,
    resource: &ResourceInfo,
    namespace: Option<&str>,
    object: Value,
) -> Result<Value> {
    let name = object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::schema("update requires object.metadata.name"))?
        .to_string();

    let api = resource.api(client, namespace);
    api.get(&name).await?;
    let patched = api
        .patch(&name, &PatchParams::default(), &Patch::Merge(&object))
        .await?;
    to_value(patched)
}

pub async fn delete(
    client: Client,
    resource: &ResourceInfo,
    name: &str,
    namespace: Option<&str>,
) -> Result<bool> {
    let api = resource.api(client, namespace);
    api.delete(name, &DeleteParams::default()).await?;
    Ok(true)
}

/// Reads a dotted path (`spec.replicas`) out of an unstructured object.
pub fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Request, Response, StatusCode};
    use kube::client::Body;
    use std::sync::Mutex;
    use tower::service_fn;

    fn deployment_info() -> ResourceInfo {
        ResourceInfo {
            gvk: GroupVersionKind::new("apps", "v1", "Deployment"),
            schema_key: "io.k8s.api.apps.v1.Deployment".to_string(),
            scope: Scope::Namespaced,
            singular: "deployment".to_string(),
            plural: "deployments".to_string(),
            group_field: "apps".to_string(),
            type_name: "Deployment".to_string(),
        }
    }

    fn recording_client(
        requests: Arc<Mutex<Vec<(String, String)>>>,
        body: Value,
    ) -> Client {
        let service = service_fn(move |req: Request<Body>| {
            let requests = requests.clone();
            let body = body.clone();
            async move {
                requests
                    .lock()
                    .expect("lock requests")
                    .push((req.method().to_string(), req.uri().to_string()));
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string().into_bytes()))
                    .expect("response");
                Ok::<_, std::convert::Infallible>(response)
            }
        });
        Client::new(service, "default")
    }

    fn sample_deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "team-a"},
            "spec": {"replicas": 2}
        })
    }

    #[tokio::test]
    async fn get_addresses_the_namespaced_resource_path() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(requests.clone(), sample_deployment());

        let value = get(client, &deployment_info(), "web", Some("team-a"))
            .await
            .expect("get");
        assert_eq!(value.pointer("/metadata/name"), Some(&json!("web")));

        let captured = requests.lock().expect("lock");
        assert_eq!(captured[0].0, "GET");
        assert!(captured[0]
            .1
            .starts_with("/apis/apps/v1/namespaces/team-a/deployments/web"));
    }

    #[tokio::test]
    async fn list_applies_the_label_selector() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(
            requests.clone(),
            json!({"apiVersion": "apps/v1", "kind": "DeploymentList", "metadata": {}, "items": [sample_deployment()]}),
        );

        let values = list(client, &deployment_info(), Some("team-a"), Some("app=web"))
            .await
            .expect("list");
        assert_eq!(values.len(), 1);

        let captured = requests.lock().expect("lock");
        let (method, uri) = &captured[0];
        assert_eq!(method, "GET");
        assert!(uri.starts_with("/apis/apps/v1/namespaces/team-a/deployments"));
        assert!(uri.contains("labelSelector=app%3Dweb"));
    }

    #[tokio::test]
    async fn create_stamps_api_version_and_kind() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(requests.clone(), sample_deployment());

        let created = create(
            client,
            &deployment_info(),
            Some("team-a"),
            json!({"metadata": {"name": "web"}, "spec": {"replicas": 2}}),
        )
        .await
        .expect("create");
        assert_eq!(created.pointer("/kind"), Some(&json!("Deployment")));

        let captured = requests.lock().expect("lock");
        assert_eq!(captured[0].0, "POST");
        assert!(captured[0]
            .1
            .starts_with("/apis/apps/v1/namespaces/team-a/deployments"));
    }

    #[tokio::test]
    async fn update_fetches_then_merge_patches() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(requests.clone(), sample_deployment());

        update(
            client,
            &deployment_info(),
            Some("team-a"),
            json!({"metadata": {"name": "web"}, "spec": {"replicas": 3}}),
        )
        .await
        .expect("update");

        let captured = requests.lock().expect("lock");
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].0, "GET");
        assert_eq!(captured[1].0, "PATCH");
        assert!(captured[1]
            .1
            .starts_with("/apis/apps/v1/namespaces/team-a/deployments/web"));
    }

    #[tokio::test]
    async fn update_without_name_is_rejected() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(requests.clone(), sample_deployment());

        let err = update(
            client,
            &deployment_info(),
            Some("team-a"),
            json!({"spec": {"replicas": 3}}),
        )
        .await
        .expect_err("no name");
        assert!(err.to_string().contains("metadata.name"));
        assert!(requests.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn delete_returns_true_on_success() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let client = recording_client(
            requests.clone(),
            json!({"kind": "Status", "apiVersion": "v1", "status": "Success"}),
        );

        assert!(delete(client, &deployment_info(), "web", Some("team-a"))
            .await
            .expect("delete"));

        let captured = requests.lock().expect("lock");
        assert_eq!(captured[0].0, "DELETE");
    }

    #[test]
    fn resources_from_artifact_disambiguates_kind_collisions() {
        let mut definitions = std::collections::BTreeMap::new();
        definitions.insert(
            "com.example.a.v1.Database".to_string(),
            json!({
                "type": "object",
                "x-kubernetes-group-version-kind": [{"group": "a.example", "version": "v1", "kind": "Database"}],
                "x-scope": "Namespaced"
            }),
        );
        definitions.insert(
            "com.example.b.v1.Database".to_string(),
            json!({
                "type": "object",
                "x-kubernetes-group-version-kind": [{"group": "b.example", "version": "v1", "kind": "Database"}],
                "x-scope": "ClusterScoped"
            }),
        );
        definitions.insert(
            ".v1.Pod".to_string(),
            json!({
                "type": "object",
                "x-kubernetes-group-version-kind": [{"group": "", "version": "v1", "kind": "Pod"}],
                "x-scope": "Namespaced"
            }),
        );
        definitions.insert(
            "untyped.Helper".to_string(),
            json!({"type": "object"}),
        );
        let artifact = Artifact::new(definitions);

        let resources = resources_from_artifact(&artifact);
        assert_eq!(resources.len(), 3);

        let names: Vec<&str> = resources.iter().map(|r| r.type_name.as_str()).collect();
        assert!(names.contains(&"Pod"));
        assert!(names.contains(&"Database_a_example_v1"));
        assert!(names.contains(&"Database_b_example_v1"));

        let pod = resources.iter().find(|r| r.type_name == "Pod").expect("pod");
        assert_eq!(pod.group_field, "core");
        assert_eq!(pod.plural, "pods");
    }

    #[test]
    fn value_at_walks_dotted_paths() {
        let object = sample_deployment();
        assert_eq!(value_at(&object, "spec.replicas"), Some(&json!(2)));
        assert_eq!(value_at(&object, "metadata.name"), Some(&json!("web")));
        assert_eq!(value_at(&object, "spec.missing.deeper"), None);
    }
}
