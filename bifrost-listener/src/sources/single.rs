use crate::discovery::KubeDiscovery;
use crate::injector::ambient_metadata;
use crate::prelude::*;
use crate::reconciler::run_event_loop;
use crate::sources::SourceContext;

use bifrost_core::artifact::GroupVersionKind;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ListParams};
use kube::runtime::watcher;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Artifact key used when the listener distills its own cluster.
pub const SINGLE_CLUSTER_KEY: &str = "kubernetes";

/// Local-development source: one artifact for the cluster the listener's own
/// kubeconfig points at, refreshed whenever a CRD changes.
pub struct SingleClusterSource {
    ctx: SourceContext,
}

impl SingleClusterSource {
    pub fn new(ctx: SourceContext) -> Self {
        SingleClusterSource { ctx }
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!("single-cluster source starting against {}", self.ctx.host());
        self.reconcile().await?;

        let api: Api<CustomResourceDefinition> = Api::all(self.ctx.client.clone());
        run_event_loop(api, watcher::Config::default(), token, |_event| {
            self.reconcile()
        })
        .await
    }

    async fn reconcile(&self) -> Result<()> {
        let extra_categories = self.crd_categories().await?;
        let discovery = KubeDiscovery::new(self.ctx.client.clone(), self.ctx.host());
        let artifact = self
            .ctx
            .pipeline
            .generate(&discovery, &extra_categories)
            .await?;
        let metadata = ambient_metadata(
            &self.ctx.host(),
            SINGLE_CLUSTER_KEY,
            &self.ctx.ambient_kubeconfig,
            None,
        )?;
        self.ctx
            .pipeline
            .publish(SINGLE_CLUSTER_KEY, artifact, metadata)?;
        Ok(())
    }

    /// Categories declared on CRDs, keyed by the schema key of every served
    /// version. Discovery only reports the preferred version's categories;
    /// this fills in the rest.
    async fn crd_categories(&self) -> Result<HashMap<String, Vec<String>>> {
        let api: Api<CustomResourceDefinition> = Api::all(self.ctx.client.clone());
        let crds = api.list(&ListParams::default()).await?;

        let mut extra = HashMap::new();
        for crd in crds {
            let Some(categories) = crd.spec.names.categories.clone().filter(|c| !c.is_empty())
            else {
                continue;
            };
            for version in &crd.spec.versions {
                if !version.served {
                    continue;
                }
                let key = GroupVersionKind::new(
                    &crd.spec.group,
                    &version.name,
                    &crd.spec.names.kind,
                )
                .schema_key();
                extra.insert(key, categories.clone());
            }
        }
        Ok(extra)
    }
}
