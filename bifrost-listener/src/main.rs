use bifrost_core::store::ArtifactStore;
use bifrost_core::tls;
use bifrost_listener::pipeline::ArtifactPipeline;
use bifrost_listener::prelude::Result;
use bifrost_listener::sources::cluster_access::ClusterAccessSource;
use bifrost_listener::sources::kcp::{KcpOptions, KcpSource};
use bifrost_listener::sources::single::SingleClusterSource;
use bifrost_listener::sources::{select_strategy, SourceContext, Strategy};
use bifrost_listener::logger;

use clap::Parser;
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "bifrost-listener")]
#[command(about = "Distills Kubernetes API servers into schema artifacts", long_about = None)]
struct Cli {
    #[arg(long, env = "OPENAPI_DEFINITIONS_PATH", default_value = "./definitions")]
    definitions_path: PathBuf,
    #[arg(long, env = "ENABLE_KCP", default_value_t = false)]
    enable_kcp: bool,
    #[arg(long, env = "LOCAL_DEVELOPMENT", default_value_t = false)]
    local_development: bool,
    #[arg(long, env = "LISTENER_APIEXPORT_WORKSPACE")]
    apiexport_workspace: Option<String>,
    #[arg(long, env = "LISTENER_APIEXPORT_NAME")]
    apiexport_name: Option<String>,
    #[arg(long, env = "LISTENER_VIRTUAL_WORKSPACES_CONFIG")]
    virtual_workspaces_config: Option<PathBuf>,
    #[arg(long, env = "KUBE_CONTEXT")]
    kube_context: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    logger::setup("INFO");
    tls::ensure_rustls_provider();

    let cli = Cli::parse();

    let kube_opts = KubeConfigOptions {
        context: cli.kube_context.clone(),
        cluster: None,
        user: None,
    };
    let config = match Config::from_kubeconfig(&kube_opts).await {
        Ok(config) => {
            info!(
                "loaded kubeconfig (context: {:?}), cluster_url: {}",
                kube_opts.context, config.cluster_url
            );
            config
        }
        Err(err) => {
            info!("no usable kubeconfig ({err:?}), falling back to in-cluster config");
            let config = Config::incluster()?;
            info!("loaded in-cluster config, cluster_url: {}", config.cluster_url);
            config
        }
    };
    let client = Client::try_from(config.clone())?;

    let store = ArtifactStore::new(&cli.definitions_path)?;
    info!("artifact directory: {}", cli.definitions_path.display());
    let ctx = SourceContext {
        client,
        config,
        pipeline: ArtifactPipeline::new(store),
        ambient_kubeconfig: read_ambient_kubeconfig(),
    };

    let token = CancellationToken::new();
    let shutdown = tokio::spawn(shutdown_signal(token.clone()));

    let strategy = select_strategy(cli.enable_kcp, cli.local_development);
    info!("source strategy: {strategy:?}");
    let result = match strategy {
        Strategy::Kcp => {
            let opts = KcpOptions {
                apiexport_workspace: cli.apiexport_workspace,
                apiexport_name: cli.apiexport_name,
                virtual_workspaces_config: cli.virtual_workspaces_config,
            };
            KcpSource::new(ctx, opts)?.run(token.clone()).await
        }
        Strategy::SingleCluster => SingleClusterSource::new(ctx).run(token.clone()).await,
        Strategy::ClusterAccess => ClusterAccessSource::new(ctx).run(token.clone()).await,
    };

    token.cancel();
    shutdown.abort();
    result?;
    info!("listener shutdown");
    Ok(())
}

fn read_ambient_kubeconfig() -> Vec<u8> {
    let path = std::env::var("KUBECONFIG").map(PathBuf::from).ok().or_else(|| {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".kube").join("config"))
    });
    let Some(path) = path else {
        return Vec::new();
    };
    match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                "ambient kubeconfig {} not readable ({err}); artifacts will carry no embedded credentials",
                path.display()
            );
            Vec::new()
        }
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to install signal handler: {err}");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            token.cancel()
        },
        _ = terminate => {
            token.cancel()
        },
    }

    info!("signal received, starting graceful shutdown");
}
