use thiserror::Error;

#[derive(Error, Debug)]
#[error(transparent)]
pub struct BifrostError(Box<ErrorKind>);

#[derive(Error, Debug)]
#[error(transparent)]
pub enum ErrorKind {
    #[error("SerdeJsonError: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("IoError: {0}")]
    IoError(#[from] std::io::Error),
    #[error("UrlError: {0}")]
    UrlError(#[from] url::ParseError),
    #[error("Base64Error: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("InvalidKeyError: {0}")]
    InvalidKeyError(String),
    #[error("InvalidMetadataError: {0}")]
    InvalidMetadataError(String),
    #[error("NotFoundError: {0}")]
    NotFoundError(String),
}

impl BifrostError {
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn is_not_found(&self) -> bool {
        matches!(*self.0, ErrorKind::NotFoundError(_))
    }
}

impl<E> From<E> for BifrostError
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        BifrostError(Box::new(ErrorKind::from(err)))
    }
}
