use crate::auth::identity_from_headers;
use crate::errors::GatewayError;
use crate::registry::{EndpointRegistry, Endpoint, GatewayOptions};

use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use kube::Client;
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EndpointRegistry>,
    pub options: Arc<GatewayOptions>,
}

pub fn create_route(registry: Arc<EndpointRegistry>, options: Arc<GatewayOptions>) -> Router {
    let state = AppState { registry, options };
    Router::new()
        .route("/{key}/graphql", get(playground).post(graphql))
        .route("/{key}/subscriptions", post(subscriptions))
        .with_state(state)
}

fn endpoint_for(state: &AppState, key: &str) -> Result<Arc<Endpoint>, GatewayError> {
    state
        .registry
        .get(key)
        .ok_or_else(|| GatewayError::not_found(format!("no cluster with key {key}")))
}

/// Per-request client: the caller's identity applied to the endpoint's base
/// connection.
fn request_client(
    state: &AppState,
    endpoint: &Endpoint,
    headers: &HeaderMap,
) -> Result<Client, GatewayError> {
    let identity = identity_from_headers(headers, &state.options.claims)?;
    endpoint
        .connection
        .client_for(&identity, state.options.should_impersonate)
}

async fn playground(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<Html<String>, GatewayError> {
    endpoint_for(&state, &key)?;
    let graphql_endpoint = format!("/{key}/graphql");
    let subscription_endpoint = format!("/{key}/subscriptions");
    let config = GraphQLPlaygroundConfig::new(&graphql_endpoint)
        .subscription_endpoint(&subscription_endpoint);
    Ok(Html(playground_source(config)))
}

async fn graphql(
    Path(key): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Result<Json<async_graphql::Response>, GatewayError> {
    let endpoint = endpoint_for(&state, &key)?;
    let client = request_client(&state, &endpoint, &headers)?;
    let response = endpoint.schema.execute(request.data(client)).await;
    Ok(Json(response))
}

async fn subscriptions(
    Path(key): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let endpoint = endpoint_for(&state, &key)?;
    let client = request_client(&state, &endpoint, &headers)?;

    // The stream owns its endpoint reference, so a rebuild swapping the map
    // entry does not tear down this session mid-event.
    let stream = endpoint
        .schema
        .execute_stream(request.data(client))
        .map(move |response| {
            let _held = &endpoint;
            let payload = serde_json::to_string(&response).unwrap_or_else(|err| {
                format!("{{\"errors\":[{{\"message\":\"serialization: {err}\"}}]}}")
            });
            Ok(Event::default().data(payload))
        });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
