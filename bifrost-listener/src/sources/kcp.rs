use crate::discovery::KubeDiscovery;
use crate::errors::ErrorKind;
use crate::injector::ambient_metadata;
use crate::prelude::*;
use crate::reconciler::{run_event_loop, ResourceEvent};
use crate::sources::{client_for_url, SourceContext};
use crate::workspace_config::{
    diff_virtual_workspaces, watch_config, VirtualWorkspacesConfig,
};

use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind as KubeGvk};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Annotation KCP stamps on objects with the logical path of the workspace
/// that contains them.
const PATH_ANNOTATION: &str = "kcp.io/path";
const ROOT_WORKSPACE: &str = "root";

#[derive(Debug, Clone, Default)]
pub struct KcpOptions {
    pub apiexport_workspace: Option<String>,
    pub apiexport_name: Option<String>,
    pub virtual_workspaces_config: Option<PathBuf>,
}

/// KCP source: one artifact per logical workspace, driven by Workspace
/// events in the root workspace and APIBinding events in the hosting
/// workspace, plus virtual-workspace artifacts for APIExports.
pub struct KcpSource {
    ctx: SourceContext,
    opts: KcpOptions,
    base: String,
}

impl KcpSource {
    pub fn new(ctx: SourceContext, opts: KcpOptions) -> Result<Self> {
        let base = origin_of(&ctx.config.cluster_url)?;
        Ok(KcpSource { ctx, opts, base })
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("kcp source starting against {}", self.base);

        if let (Some(workspace), Some(name)) =
            (&self.opts.apiexport_workspace, &self.opts.apiexport_name)
        {
            let key = format!("{workspace}:{name}");
            let url = format!(
                "{}{}{workspace}/{name}",
                self.base,
                bifrost_core::metadata::VIRTUAL_WORKSPACE_PREFIX
            );
            if let Err(err) = self.reconcile_virtual(&key, &url).await {
                warn!("initial virtual workspace {key} failed: {err:?}");
            }
        }

        let root_client =
            client_for_url(&self.ctx.config, &format!("{}/clusters/{ROOT_WORKSPACE}", self.base))?;
        let workspace_api: Api<DynamicObject> = Api::all_with(root_client, &workspace_resource());
        let binding_api: Api<DynamicObject> =
            Api::all_with(self.ctx.client.clone(), &apibinding_resource());

        let workspaces = run_event_loop(
            workspace_api,
            watcher::Config::default(),
            token.clone(),
            |event| self.handle_workspace(event),
        );
        let bindings = run_event_loop(
            binding_api,
            watcher::Config::default(),
            token.clone(),
            |event| self.handle_binding(event),
        );
        let config_watch = self.run_config_watch(token.clone());

        let (workspaces, bindings, config_watch) =
            tokio::join!(workspaces, bindings, config_watch);
        workspaces?;
        bindings?;
        config_watch?;
        Ok(())
    }

    async fn handle_workspace(&self, event: ResourceEvent<DynamicObject>) -> Result<()> {
        match event {
            ResourceEvent::Applied(workspace) => {
                let Some(path) = workspace_path(&workspace) else {
                    debug!("workspace {} has no resolvable path", workspace.name_any());
                    return Ok(());
                };
                if is_system_path(&path) {
                    debug!("ignoring system workspace {path}");
                    return Ok(());
                }
                self.reconcile_workspace(&path).await
            }
            ResourceEvent::Deleted(workspace) => {
                let Some(path) = workspace_path(&workspace) else {
                    return Ok(());
                };
                self.ctx.pipeline.remove(&path)
            }
        }
    }

    async fn handle_binding(&self, event: ResourceEvent<DynamicObject>) -> Result<()> {
        let binding = match &event {
            ResourceEvent::Applied(binding) | ResourceEvent::Deleted(binding) => binding,
        };
        // A binding added or removed changes the API surface of the
        // workspace that holds it; rebuild that workspace's artifact.
        let Some(path) = binding.annotations().get(PATH_ANNOTATION).cloned() else {
            debug!(
                "APIBinding {} carries no {PATH_ANNOTATION} annotation",
                binding.name_any()
            );
            return Ok(());
        };
        if is_system_path(&path) {
            return Ok(());
        }
        self.reconcile_workspace(&path).await
    }

    async fn reconcile_workspace(&self, path: &str) -> Result<()> {
        let url = format!("{}/clusters/{path}", self.base);
        let client = client_for_url(&self.ctx.config, &url)?;
        let discovery = KubeDiscovery::new(client, url.clone());

        let artifact = self
            .ctx
            .pipeline
            .generate(&discovery, &HashMap::new())
            .await?;
        let metadata = ambient_metadata(&url, path, &self.ctx.ambient_kubeconfig, None)?;
        self.ctx.pipeline.publish(path, artifact, metadata)?;
        Ok(())
    }

    async fn reconcile_virtual(&self, key: &str, url: &str) -> Result<()> {
        let client = client_for_url(&self.ctx.config, url)?;
        let discovery = KubeDiscovery::new(client, url.to_string());

        let artifact = self
            .ctx
            .pipeline
            .generate(&discovery, &HashMap::new())
            .await?;
        // Virtual workspaces keep their full URL as the host.
        let metadata =
            ambient_metadata(url, key, &self.ctx.ambient_kubeconfig, Some(url))?;
        self.ctx.pipeline.publish(key, artifact, metadata)?;
        Ok(())
    }

    async fn run_config_watch(&self, token: CancellationToken) -> Result<()> {
        let Some(path) = self.opts.virtual_workspaces_config.clone() else {
            token.cancelled().await;
            return Ok(());
        };

        let (tx, mut rx) = mpsc::channel(8);
        let watcher_token = token.clone();
        let watcher = tokio::spawn(watch_config(path, watcher_token, tx));

        let mut current = VirtualWorkspacesConfig::default();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                update = rx.recv() => {
                    let Some(update) = update else {
                        break;
                    };
                    let (added, removed) = diff_virtual_workspaces(&current, &update);
                    for entry in added {
                        if let Err(err) = self.reconcile_virtual(&entry.name, &entry.url).await {
                            warn!("virtual workspace {} failed: {err:?}", entry.name);
                        }
                    }
                    for key in removed {
                        if let Err(err) = self.ctx.pipeline.remove(&key) {
                            warn!("removing virtual workspace {key} failed: {err:?}");
                        }
                    }
                    current = update;
                },
            }
        }

        match watcher.await {
            Ok(result) => result,
            Err(err) => Err(ErrorKind::ConfigError(format!("config watcher panicked: {err}")).into()),
        }
    }
}

fn workspace_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &KubeGvk::gvk("tenancy.kcp.io", "v1alpha1", "Workspace"),
        "workspaces",
    )
}

fn apibinding_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &KubeGvk::gvk("apis.kcp.io", "v1alpha1", "APIBinding"),
        "apibindings",
    )
}

/// Full logical path of a workspace object: the `kcp.io/path` annotation
/// names the parent, the object name is the final segment. Workspaces
/// observed in the root workspace without the annotation live under `root`.
fn workspace_path(workspace: &DynamicObject) -> Option<String> {
    let name = workspace.name_any();
    if name.is_empty() {
        return None;
    }
    match workspace.annotations().get(PATH_ANNOTATION) {
        Some(parent) if !parent.is_empty() => Some(format!("{parent}:{name}")),
        _ => Some(format!("{ROOT_WORKSPACE}:{name}")),
    }
}

/// System workspaces (`system:shard` and friends) are shard internals, never
/// tenant content.
fn is_system_path(path: &str) -> bool {
    path.split(':').any(|segment| segment == "system") || path.starts_with("system:")
}

fn origin_of(uri: &http::Uri) -> Result<String> {
    let scheme = uri
        .scheme_str()
        .ok_or_else(|| ErrorKind::ConfigError(format!("cluster url {uri} has no scheme")))?;
    let authority = uri
        .authority()
        .ok_or_else(|| ErrorKind::ConfigError(format!("cluster url {uri} has no authority")))?;
    Ok(format!("{scheme}://{authority}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace(name: &str, path_annotation: Option<&str>) -> DynamicObject {
        let mut annotations = serde_json::Map::new();
        if let Some(path) = path_annotation {
            annotations.insert(PATH_ANNOTATION.to_string(), json!(path));
        }
        serde_json::from_value(json!({
            "apiVersion": "tenancy.kcp.io/v1alpha1",
            "kind": "Workspace",
            "metadata": {
                "name": name,
                "annotations": annotations
            }
        }))
        .expect("workspace")
    }

    #[test]
    fn workspace_path_prefers_the_path_annotation() {
        assert_eq!(
            workspace_path(&workspace("alpha", None)),
            Some("root:alpha".to_string())
        );
        assert_eq!(
            workspace_path(&workspace("bar", Some("root:foo"))),
            Some("root:foo:bar".to_string())
        );
    }

    #[test]
    fn system_paths_are_ignored() {
        assert!(is_system_path("system:shard"));
        assert!(is_system_path("root:system:something"));
        assert!(!is_system_path("root:alpha"));
        assert!(!is_system_path("root:systematic"));
    }

    #[test]
    fn origin_strips_path_and_query() {
        let uri: http::Uri = "https://kcp.example:6443/services/apiexport/root/core"
            .parse()
            .expect("uri");
        assert_eq!(origin_of(&uri).expect("origin"), "https://kcp.example:6443");
    }
}
