use crate::errors::ErrorKind;
use crate::pipeline::ArtifactPipeline;
use crate::prelude::*;

use kube::Client;

pub mod cluster_access;
pub mod kcp;
pub mod single;

/// Which source feeds the schema pipeline. KCP wins over everything when
/// enabled; local development forces the single-cluster source; the default
/// is ClusterAccess-driven multi-cluster operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Kcp,
    SingleCluster,
    ClusterAccess,
}

pub fn select_strategy(enable_kcp: bool, local_development: bool) -> Strategy {
    if enable_kcp {
        Strategy::Kcp
    } else if local_development {
        Strategy::SingleCluster
    } else {
        Strategy::ClusterAccess
    }
}

/// Everything a source needs: the listener's own cluster client and config,
/// the shared pipeline, and the raw ambient kubeconfig for embedding.
#[derive(Clone)]
pub struct SourceContext {
    pub client: Client,
    pub config: kube::Config,
    pub pipeline: ArtifactPipeline,
    pub ambient_kubeconfig: Vec<u8>,
}

impl SourceContext {
    pub fn host(&self) -> String {
        self.config
            .cluster_url
            .to_string()
            .trim_end_matches('/')
            .to_string()
    }
}

/// Clone of the listener's own config pointed at a different URL; used for
/// per-workspace and virtual-workspace clients.
pub(crate) fn client_for_url(config: &kube::Config, url: &str) -> Result<Client> {
    let mut config = config.clone();
    config.cluster_url = url
        .parse::<http::Uri>()
        .map_err(|err| ErrorKind::ConfigError(format!("invalid cluster url {url}: {err}")))?;
    let client = Client::try_from(config)?;
    Ok(client)
}
