use thiserror::Error;

/// Errors produced by the murmur protocol layer.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Codec(e.to_string())
    }
}

/// Why a connection request was refused at the upgrade gate.
///
/// The `Display` text is exactly what the client sees in the error envelope;
/// the `reason` on `Invalid` stays server-side for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no auth token")]
    Missing,

    #[error("auth failed")]
    Invalid { reason: String },
}

impl AuthError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        AuthError::Invalid {
            reason: reason.into(),
        }
    }

    /// Server-side detail for logs.
    pub fn reason(&self) -> &str {
        match self {
            AuthError::Missing => "token absent",
            AuthError::Invalid { reason } => reason,
        }
    }
}

/// Delivery failures reported by the router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No live connection for the recipient. The display text is the status
    /// message sent back to the sender.
    #[error("{0} offline")]
    RecipientOffline(String),

    /// The recipient's outbound buffer is full; the envelope was dropped.
    #[error("{0} busy")]
    RecipientBusy(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
