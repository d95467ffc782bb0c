use crate::errors::ErrorKind;
use crate::prelude::*;

use async_trait::async_trait;
use bifrost_core::artifact::{GroupVersionKind, Scope};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reference to one group/version document of the OpenAPI v3 discovery map.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct OpenApiPathRef {
    #[serde(rename = "serverRelativeURL")]
    pub server_relative_url: String,
}

/// Scope and naming information for a resource, as served by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestMapping {
    pub scope: Scope,
    pub plural: String,
    pub singular: String,
}

/// Maps GVKs onto their REST-level identity (scope, plural, singular).
#[derive(Debug, Clone, Default)]
pub struct RestMapper {
    mappings: HashMap<GroupVersionKind, RestMapping>,
}

impl RestMapper {
    pub fn insert(&mut self, gvk: GroupVersionKind, mapping: RestMapping) {
        self.mappings.insert(gvk, mapping);
    }

    pub fn mapping_for(&self, gvk: &GroupVersionKind) -> Option<&RestMapping> {
        self.mappings.get(gvk)
    }

    pub fn scope_for(&self, gvk: &GroupVersionKind) -> Option<Scope> {
        self.mappings.get(gvk).map(|m| m.scope)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Derives mappings from the preferred resource lists. Subresource
    /// entries (`pods/status`) are skipped.
    pub fn from_resource_lists(lists: &[APIResourceList]) -> Self {
        let mut mapper = RestMapper::default();
        for list in lists {
            let (group, version) = split_group_version(&list.group_version);
            for resource in &list.resources {
                if resource.name.contains('/') {
                    continue;
                }
                let gvk = GroupVersionKind::new(group, version, &resource.kind);
                let scope = if resource.namespaced {
                    Scope::Namespaced
                } else {
                    Scope::ClusterScoped
                };
                let singular = if resource.singular_name.is_empty() {
                    resource.kind.to_lowercase()
                } else {
                    resource.singular_name.clone()
                };
                mapper.insert(
                    gvk,
                    RestMapping {
                        scope,
                        plural: resource.name.clone(),
                        singular,
                    },
                );
            }
        }
        mapper
    }
}

pub fn split_group_version(group_version: &str) -> (&str, &str) {
    match group_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", group_version),
    }
}

/// Read-only view of a cluster's API surface.
#[async_trait]
pub trait ClusterDiscovery: Send + Sync {
    /// Base URL of the API server this discovery targets.
    fn host(&self) -> &str;

    /// One resource list per group, restricted to the group's preferred
    /// version, with categories as served by the cluster.
    async fn preferred_resources(&self) -> Result<Vec<APIResourceList>>;

    /// The OpenAPI v3 discovery map, unfiltered.
    async fn openapi_v3_paths(&self) -> Result<BTreeMap<String, OpenApiPathRef>>;

    /// One group/version schema document.
    async fn fetch_schema(&self, path: &OpenApiPathRef) -> Result<Value>;

    async fn rest_mapper(&self) -> Result<RestMapper> {
        let lists = self.preferred_resources().await?;
        Ok(RestMapper::from_resource_lists(&lists))
    }
}

/// Drops OpenAPI paths whose group/version ancestor is not in the preferred
/// set (`api/{version}` for the core group, `apis/{group}/{version}` for the
/// rest). Aggregation endpoints like `apis/apps` and non-resource paths are
/// dropped with them.
pub fn filter_preferred_paths(
    paths: BTreeMap<String, OpenApiPathRef>,
    preferred: &[APIResourceList],
) -> BTreeMap<String, OpenApiPathRef> {
    let allowed: std::collections::HashSet<String> = preferred
        .iter()
        .map(|list| {
            let (group, version) = split_group_version(&list.group_version);
            if group.is_empty() {
                format!("api/{version}")
            } else {
                format!("apis/{group}/{version}")
            }
        })
        .collect();

    paths
        .into_iter()
        .filter(|(path, _)| {
            let keep = allowed.contains(path);
            if !keep {
                debug!("dropping non-preferred OpenAPI path {path}");
            }
            keep
        })
        .collect()
}

/// Discovery over a live API server.
pub struct KubeDiscovery {
    client: Client,
    host: String,
    timeout: Duration,
}

impl KubeDiscovery {
    pub fn new(client: Client, host: impl Into<String>) -> Self {
        KubeDiscovery {
            client,
            host: host.into(),
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, kube::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ErrorKind::DiscoveryFailure(format!("{what}: {err}")).into()),
            Err(_) => Err(ErrorKind::DiscoveryFailure(format!(
                "{what}: timed out after {:?}",
                self.timeout
            ))
            .into()),
        }
    }

    async fn get_json(&self, uri: &str) -> Result<Value> {
        let request = http::Request::builder()
            .uri(uri)
            .body(Vec::new())?;
        let text = self.bounded(uri, self.client.request_text(request)).await?;
        let value = serde_json::from_str(&text)
            .map_err(|err| ErrorKind::SchemaError(format!("{uri}: {err}")))?;
        Ok(value)
    }
}

#[async_trait]
impl ClusterDiscovery for KubeDiscovery {
    fn host(&self) -> &str {
        &self.host
    }

    async fn preferred_resources(&self) -> Result<Vec<APIResourceList>> {
        let mut lists = Vec::new();

        let core = self
            .bounded("/api", self.client.list_core_api_versions())
            .await?;
        if let Some(version) = core.versions.first() {
            let list = self
                .bounded(
                    "core resources",
                    self.client.list_core_api_resources(version),
                )
                .await?;
            lists.push(list);
        }

        let groups = self
            .bounded("/apis", self.client.list_api_groups())
            .await?;
        for group in groups.groups {
            let preferred = group
                .preferred_version
                .or_else(|| group.versions.first().cloned());
            let Some(preferred) = preferred else {
                warn!("group {} advertises no versions, skipping", group.name);
                continue;
            };
            match self
                .bounded(
                    "group resources",
                    self.client.list_api_group_resources(&preferred.group_version),
                )
                .await
            {
                Ok(list) => lists.push(list),
                Err(err) => {
                    // One broken aggregated API must not hide every other group.
                    warn!(
                        "failed to list resources of {}: {err:?}, skipping",
                        preferred.group_version
                    );
                }
            }
        }
        Ok(lists)
    }

    async fn openapi_v3_paths(&self) -> Result<BTreeMap<String, OpenApiPathRef>> {
        #[derive(Deserialize)]
        struct DiscoveryMap {
            paths: BTreeMap<String, OpenApiPathRef>,
        }
        let value = self.get_json("/openapi/v3").await?;
        let map: DiscoveryMap = serde_json::from_value(value)
            .map_err(|err| ErrorKind::SchemaError(format!("/openapi/v3: {err}")))?;
        Ok(map.paths)
    }

    async fn fetch_schema(&self, path: &OpenApiPathRef) -> Result<Value> {
        self.get_json(&path.server_relative_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Request, Response, StatusCode};
    use kube::client::Body;
    use serde_json::json;
    use std::convert::Infallible;
    use tower::service_fn;

    fn discovery_client(routes: HashMap<&'static str, Value>) -> Client {
        let service = service_fn(move |req: Request<Body>| {
            let routes = routes.clone();
            async move {
                let path = req.uri().path().to_string();
                let response = match routes.get(path.as_str()) {
                    Some(body) => Response::builder()
                        .status(StatusCode::OK)
                        .header("content-type", "application/json")
                        .body(Body::from(body.to_string().into_bytes()))
                        .expect("response"),
                    None => Response::builder()
                        .status(StatusCode::NOT_FOUND)
                        .body(Body::from(Vec::new()))
                        .expect("response"),
                };
                Ok::<_, Infallible>(response)
            }
        });
        Client::new(service, "default")
    }

    fn routes() -> HashMap<&'static str, Value> {
        let mut routes = HashMap::new();
        routes.insert("/api", json!({"kind": "APIVersions", "versions": ["v1"]}));
        routes.insert(
            "/api/v1",
            json!({
                "kind": "APIResourceList",
                "groupVersion": "v1",
                "resources": [
                    {"name": "pods", "singularName": "pod", "namespaced": true, "kind": "Pod", "verbs": ["get", "list", "watch"]},
                    {"name": "pods/status", "singularName": "", "namespaced": true, "kind": "Pod", "verbs": ["get"]},
                    {"name": "namespaces", "singularName": "namespace", "namespaced": false, "kind": "Namespace", "verbs": ["get", "list"]}
                ]
            }),
        );
        routes.insert(
            "/apis",
            json!({
                "kind": "APIGroupList",
                "groups": [{
                    "name": "apps",
                    "versions": [
                        {"groupVersion": "apps/v1", "version": "v1"},
                        {"groupVersion": "apps/v1beta1", "version": "v1beta1"}
                    ],
                    "preferredVersion": {"groupVersion": "apps/v1", "version": "v1"}
                }]
            }),
        );
        routes.insert(
            "/apis/apps/v1",
            json!({
                "kind": "APIResourceList",
                "groupVersion": "apps/v1",
                "resources": [
                    {"name": "deployments", "singularName": "deployment", "namespaced": true, "kind": "Deployment", "verbs": ["get", "list"], "categories": ["all"]}
                ]
            }),
        );
        routes
    }

    #[tokio::test]
    async fn preferred_resources_covers_core_and_groups() {
        let discovery = KubeDiscovery::new(discovery_client(routes()), "https://api.example");
        let lists = discovery.preferred_resources().await.expect("discover");

        let group_versions: Vec<&str> =
            lists.iter().map(|l| l.group_version.as_str()).collect();
        assert_eq!(group_versions, vec!["v1", "apps/v1"]);
    }

    #[tokio::test]
    async fn rest_mapper_skips_subresources_and_records_scope() {
        let discovery = KubeDiscovery::new(discovery_client(routes()), "https://api.example");
        let mapper = discovery.rest_mapper().await.expect("mapper");

        assert_eq!(mapper.len(), 3);
        let pod = GroupVersionKind::new("", "v1", "Pod");
        assert_eq!(mapper.scope_for(&pod), Some(Scope::Namespaced));
        assert_eq!(mapper.mapping_for(&pod).expect("pod").plural, "pods");

        let namespace = GroupVersionKind::new("", "v1", "Namespace");
        assert_eq!(mapper.scope_for(&namespace), Some(Scope::ClusterScoped));

        let deployment = GroupVersionKind::new("apps", "v1", "Deployment");
        assert_eq!(
            mapper.mapping_for(&deployment).expect("deployment").plural,
            "deployments"
        );
    }

    #[tokio::test]
    async fn openapi_paths_parse_discovery_map() {
        let mut routes = routes();
        routes.insert(
            "/openapi/v3",
            json!({
                "paths": {
                    "api/v1": {"serverRelativeURL": "/openapi/v3/api/v1?hash=a"},
                    "apis/apps/v1": {"serverRelativeURL": "/openapi/v3/apis/apps/v1?hash=b"},
                    "apis/apps": {"serverRelativeURL": "/openapi/v3/apis/apps?hash=c"}
                }
            }),
        );
        let discovery = KubeDiscovery::new(discovery_client(routes), "https://api.example");
        let paths = discovery.openapi_v3_paths().await.expect("paths");
        assert_eq!(paths.len(), 3);
        assert_eq!(
            paths["api/v1"].server_relative_url,
            "/openapi/v3/api/v1?hash=a"
        );
    }

    #[test]
    fn filter_drops_paths_outside_the_preferred_set() {
        let preferred: Vec<APIResourceList> = vec![
            serde_json::from_value(json!({
                "groupVersion": "v1",
                "resources": []
            }))
            .expect("list"),
            serde_json::from_value(json!({
                "groupVersion": "apps/v1",
                "resources": []
            }))
            .expect("list"),
        ];
        let mut paths = BTreeMap::new();
        for path in [
            "api/v1",
            "apis/apps/v1",
            "apis/apps/v1beta1",
            "apis/apps",
            ".well-known/openid-configuration",
        ] {
            paths.insert(
                path.to_string(),
                OpenApiPathRef {
                    server_relative_url: format!("/openapi/v3/{path}"),
                },
            );
        }

        let filtered = filter_preferred_paths(paths, &preferred);
        let keys: Vec<&str> = filtered.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["api/v1", "apis/apps/v1"]);
    }
}
