//! Error types surfaced by the cloud client

/// Network-level failure underneath an auth or dispatch call
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("connection failed")]
    Connect(#[source] reqwest::Error),

    #[error("transport error")]
    Other(#[source] reqwest::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err)
        } else if err.is_connect() {
            TransportError::Connect(err)
        } else {
            TransportError::Other(err)
        }
    }
}

/// The token request failed or was refused
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token request failed")]
    Transport(#[from] TransportError),

    #[error("token endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("token request rejected: {reason}")]
    Rejected { reason: String },

    #[error("malformed token response: {0}")]
    Decode(String),
}

/// A command request failed or could not be issued
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("not authenticated; call authenticate first")]
    NotAuthenticated,

    #[error("command request failed")]
    Transport(#[from] TransportError),

    #[error("command endpoint returned HTTP {http_status}: {body}")]
    Status { http_status: u16, body: String },
}

impl DispatchError {
    /// Whether the failure came from the remote side, meaning the token may
    /// no longer be valid
    pub fn is_remote(&self) -> bool {
        !matches!(self, DispatchError::NotAuthenticated)
    }
}
