use crate::outcome::TransportError;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum DocDbError {
    /// Network-level failure surfaced by the transport or an interceptor.
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// Non-success HTTP status code, with fields taken from the JSON body.
    #[error("http error {status}: {body}")]
    Http {
        status: u16,
        /// `error` field of the response body, if present.
        error: Option<String>,
        /// `reason` field of the response body, if present.
        reason: Option<String>,
        /// Raw response body.
        body: String,
    },
    /// Invalid client or request configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl DocDbError {
    /// HTTP status code carried by an [`DocDbError::Http`] error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for DocDbError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
