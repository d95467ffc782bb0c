use crate::cluster_access::{self, ClusterAccess};
use crate::discovery::KubeDiscovery;
use crate::errors::ErrorKind;
use crate::injector::MetadataInjector;
use crate::prelude::*;
use crate::reconciler::{run_event_loop, ResourceEvent};
use crate::sources::SourceContext;

use bifrost_core::connection::config_from_metadata;
use kube::api::{Api, ListParams};
use kube::runtime::watcher;
use kube::Client;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Multi-cluster source: one artifact per ClusterAccess object, built with
/// the credentials that object references.
pub struct ClusterAccessSource {
    ctx: SourceContext,
    injector: MetadataInjector,
}

impl ClusterAccessSource {
    pub fn new(ctx: SourceContext) -> Self {
        let injector = MetadataInjector::new(ctx.client.clone());
        ClusterAccessSource { ctx, injector }
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let api: Api<ClusterAccess> = Api::all(self.ctx.client.clone());

        // Running without the CRD registered is a deployment mistake, not a
        // transient condition.
        if let Err(err) = api.list(&ListParams::default().limit(1)).await {
            return Err(ErrorKind::ConfigError(format!(
                "ClusterAccess kind is not available on {}: {err}",
                self.ctx.host()
            ))
            .into());
        }
        info!("cluster-access source starting against {}", self.ctx.host());

        run_event_loop(api, watcher::Config::default(), token, |event| {
            self.handle(event)
        })
        .await
    }

    async fn handle(&self, event: ResourceEvent<ClusterAccess>) -> Result<()> {
        match event {
            ResourceEvent::Applied(access) => self.reconcile(&access).await,
            ResourceEvent::Deleted(access) => {
                let key = cluster_access::cluster_key(&access);
                self.ctx.pipeline.remove(&key)
            }
        }
    }

    async fn reconcile(&self, access: &ClusterAccess) -> Result<()> {
        let key = cluster_access::cluster_key(access);
        let metadata = match self.injector.metadata_for(access).await {
            Ok(metadata) => metadata,
            Err(err) => {
                // Configuration mistakes halt this object only; the existing
                // artifact, if any, stays in place.
                warn!("ClusterAccess {key} has unusable configuration: {err:?}");
                return Ok(());
            }
        };

        let config = config_from_metadata(&metadata).await?;
        let client = Client::try_from(config)?;
        let discovery = KubeDiscovery::new(client, metadata.host.clone());

        let artifact = self
            .ctx
            .pipeline
            .generate(&discovery, &HashMap::new())
            .await?;
        self.ctx.pipeline.publish(&key, artifact, metadata)?;
        Ok(())
    }
}
