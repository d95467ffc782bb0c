use bifrost_core::errors::BifrostError;
use thiserror::Error;

#[derive(Error, Debug)]
#[error(transparent)]
pub struct ListenerError(Box<ErrorKind>);

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
    #[error("KubeconfigError: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),
    #[error("KubeconfigInferError: {0}")]
    KubeconfigInferError(#[from] kube::config::InClusterError),
    #[error("HttpError: {0}")]
    HttpError(#[from] http::Error),
    #[error("NotifyError: {0}")]
    NotifyError(#[from] notify::Error),
    #[error("UrlError: {0}")]
    UrlError(#[from] url::ParseError),
    #[error("DiscoveryFailure: {0}")]
    DiscoveryFailure(String),
    #[error("NotPreferred: {0}")]
    NotPreferred(String),
    #[error("ConfigError: {0}")]
    ConfigError(String),
    #[error("SchemaError: {0}")]
    SchemaError(String),
}

impl ListenerError {
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn config(message: impl Into<String>) -> Self {
        ErrorKind::ConfigError(message.into()).into()
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        ErrorKind::DiscoveryFailure(message.into()).into()
    }

    pub fn schema(message: impl Into<String>) -> Self {
        ErrorKind::SchemaError(message.into()).into()
    }
}

impl<E> From<E> for ListenerError
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        ListenerError(Box::new(ErrorKind::from(err)))
    }
}
