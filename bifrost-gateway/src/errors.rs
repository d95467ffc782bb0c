use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bifrost_core::errors::BifrostError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error(transparent)]
pub struct GatewayError(Box<ErrorKind>);

#[derive(Error, Debug)]
#[error(transparent)]
pub enum ErrorKind {
    #[error("BifrostError: {0}")]
    BifrostError(#[from] BifrostError),
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("KubeClientError: {0}")]
    KubeClientError(#[from] kube::Error),
    #[error("NotifyError: {0}")]
    NotifyError(#[from] notify::Error),
    #[error("GraphQLSchemaError: {0}")]
    GraphQLSchemaError(String),
    #[error("AuthError: {0}")]
    AuthError(String),
    #[error("NotFoundError: {0}")]
    NotFoundError(String),
    #[error("WatchError: {0}")]
    WatchError(String),
}

impl GatewayError {
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn auth(message: impl Into<String>) -> Self {
        ErrorKind::AuthError(message.into()).into()
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ErrorKind::NotFoundError(message.into()).into()
    }

    pub fn schema(message: impl Into<String>) -> Self {
        ErrorKind::GraphQLSchemaError(message.into()).into()
    }

    pub fn watch(message: impl Into<String>) -> Self {
        ErrorKind::WatchError(message.into()).into()
    }

    fn status(&self) -> StatusCode {
        match *self.0 {
            ErrorKind::AuthError(_) => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFoundError(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E> From<E> for GatewayError
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        GatewayError(Box::new(ErrorKind::from(err)))
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorMessage>,
}

/// Failures that never reach GraphQL execution still answer with a GraphQL-
/// shaped `errors` array so clients have one error surface.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody {
            errors: vec![ErrorMessage {
                message: self.to_string(),
            }],
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_401_and_not_found_to_404() {
        assert_eq!(
            GatewayError::auth("missing bearer token").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::not_found("unknown cluster key").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::watch("stream closed").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
