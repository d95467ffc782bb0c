use bifrost_core::store::ArtifactStore;
use bifrost_core::tls;
use bifrost_gateway::auth::ClaimsConfig;
use bifrost_gateway::errors::GatewayError;
use bifrost_gateway::logger;
use bifrost_gateway::prelude::Result;
use bifrost_gateway::registry::{EndpointRegistry, GatewayOptions};
use bifrost_gateway::routes;

use axum::http::{header, HeaderValue};
use axum::middleware::map_response;
use axum::response::Response;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use shadow_rs::shadow;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::propagate_header::PropagateHeaderLayer;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace;
use tracing::{info, warn};

shadow!(build);

#[derive(Parser)]
#[command(name = "bifrost-gateway")]
#[command(about = "Serves one GraphQL endpoint per schema artifact", long_about = None)]
struct Cli {
    #[arg(long, env = "GATEWAY_PORT", default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "OPENAPI_DEFINITIONS_PATH", default_value = "./definitions")]
    definitions_path: PathBuf,
    #[arg(long, env = "GATEWAY_USERNAME_CLAIM", default_value = "sub")]
    username_claim: String,
    #[arg(long, env = "GATEWAY_GROUPS_CLAIM", default_value = "groups")]
    groups_claim: String,
    #[arg(long, env = "GATEWAY_SHOULD_IMPERSONATE", default_value_t = true)]
    should_impersonate: bool,
    /// Comma-separated allowed CORS origins; unset means permissive.
    #[arg(long, env = "GATEWAY_CORS_ALLOWED_ORIGINS")]
    cors_allowed_origins: Option<String>,
}

pub const APP_VERSION: &str = shadow_rs::formatcp!(
    "{} ({} {}), build_env: {}, {}, {}",
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL,
    build::CARGO_VERSION
);

async fn set_version_header<B>(mut res: Response<B>) -> Response<B> {
    match APP_VERSION.parse() {
        Ok(value) => {
            res.headers_mut().insert("x-version-id", value);
        }
        Err(err) => {
            warn!("Failed to parse x-version-id header value: {err}");
        }
    }
    res
}

fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    match allowed_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    logger::setup("INFO");
    tls::ensure_rustls_provider();

    let cli = Cli::parse();

    let store = ArtifactStore::new(&cli.definitions_path)
        .map_err(bifrost_gateway::errors::ErrorKind::from)?;
    info!("artifact directory: {}", cli.definitions_path.display());

    let options = Arc::new(GatewayOptions {
        claims: ClaimsConfig {
            username_claim: cli.username_claim.clone(),
            groups_claim: cli.groups_claim.clone(),
        },
        should_impersonate: cli.should_impersonate,
    });
    info!(
        "caller identity from claim {:?} (groups {:?}), impersonation: {}",
        options.claims.username_claim, options.claims.groups_claim, options.should_impersonate
    );

    let registry = Arc::new(EndpointRegistry::new(store));
    registry.scan().await?;
    info!("serving endpoints for keys: {:?}", registry.keys());

    let token = CancellationToken::new();
    let watcher = tokio::spawn(registry.clone().watch(token.clone()));

    let main_router = routes::create_route(registry, options);
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    let route = axum::Router::new()
        .merge(main_router)
        .route(
            "/render/metrics",
            axum::routing::get(|| async move { metric_handle.render() }),
        )
        .layer(prometheus_layer)
        .layer(map_response(set_version_header))
        // High level logging of requests and responses
        .layer(
            trace::TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().include_headers(true))
                .on_request(trace::DefaultOnRequest::new().level(tracing::Level::DEBUG))
                .on_response(trace::DefaultOnResponse::new().level(tracing::Level::DEBUG)),
        )
        // Bearer tokens must never show up in logs.
        .layer(SetSensitiveHeadersLayer::new(std::iter::once(
            header::AUTHORIZATION,
        )))
        .layer(CompressionLayer::new())
        // Propagate `x-request-id`s from requests to responses
        .layer(PropagateHeaderLayer::new(header::HeaderName::from_static(
            "x-request-id",
        )))
        .layer(cors_layer(cli.cors_allowed_origins.as_deref()));

    let http_addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse().map_err(|err| {
        GatewayError::from(std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
    })?;
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(GatewayError::from)?;
    info!("Bifrost gateway is running on http://{http_addr}");

    let shutdown_token = token.clone();
    axum::serve(
        listener,
        route.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_token))
    .await
    .map_err(|err| GatewayError::from(std::io::Error::other(err)))?;

    token.cancel();
    match watcher.await {
        Ok(result) => result?,
        Err(err) => warn!("artifact watcher task failed: {err}"),
    }
    info!("gateway shutdown");
    Ok(())
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
