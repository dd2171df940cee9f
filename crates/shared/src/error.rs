use thiserror::Error;

/// Identity provider failures. Cancellation is a distinct, non-destructive
/// outcome and must not be reported like a provider error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in canceled by the user")]
    Canceled,
    #[error("identity provider rejected the request: {0}")]
    Provider(String),
    #[error("identity provider unreachable: {0}")]
    Transport(String),
}

impl AuthError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, AuthError::Canceled)
    }
}

/// Document store transport or permission failure. Expected absence of a
/// document is not an error; `get` reports it as `None`.
#[derive(Debug, Error)]
#[error("document store failure: {0}")]
pub struct StoreError(pub String);

/// Blob store upload/resolve failure. A path with nothing uploaded at it is
/// not an error; `resolve_url` reports it as `None`.
#[derive(Debug, Error)]
#[error("blob store failure: {0}")]
pub struct BlobError(pub String);
