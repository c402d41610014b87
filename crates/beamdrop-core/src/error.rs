use thiserror::Error;

/// Errors produced by the beamdrop protocol and hub layers.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type HubResult<T> = Result<T, HubError>;
