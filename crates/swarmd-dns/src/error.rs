use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("malformed DNS message: {0}")]
    Protocol(#[from] hickory_proto::ProtoError),
    #[error("upstream DNS query failed: {0}")]
    Upstream(String),
    #[error(transparent)]
    Core(#[from] swarmd_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
