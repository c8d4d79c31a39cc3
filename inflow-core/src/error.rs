use thiserror::Error;

#[derive(Error, Debug)]
pub enum InflowError {
    #[error("metadata store error: {0}")]
    Store(String),

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("notification error: {0}")]
    Notify(String),

    #[error("invalid event payload: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InflowError>;
