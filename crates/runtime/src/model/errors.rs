use thiserror::Error;

/// Errors from a model backend call. Any of these fails the current query.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The request never got an HTTP response (DNS, TLS, timeout).
    #[error("network: {0}")]
    Network(String),

    /// Non-success status, with the body the endpoint sent.
    #[error("provider api: {0}")]
    Api(String),

    /// The endpoint declined to answer the prompt.
    #[error("prompt blocked: {0}")]
    Blocked(String),

    /// The body was not the expected shape.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}
