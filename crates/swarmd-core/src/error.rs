use thiserror::Error;

/// Error kinds shared across every agent subsystem, matching the
/// disposition table in the core specification: recoverable failures are
/// always localized, destructive operations are idempotent, and only a
/// handful of startup failures are fatal.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to decrypt gossip frame")]
    DecryptFailure,

    #[error("no upstream resolver answered: {0}")]
    UpstreamFailure(String),

    #[error("container runtime operation failed: {0}")]
    RuntimeFailure(String),

    #[error("failed to persist state: {0}")]
    PersistFailure(String),

    #[error("authorization failed: {0}")]
    AuthFailure(String),

    #[error("no node matches the pod's node selector")]
    NoMatchingNode,

    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
