use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("malformed path {path:?}: {reason}")]
    MalformedPath { path: String, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("stale node: {0}")]
    StaleNode(String),
    #[error("transaction failure: {0}")]
    Transaction(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        Error::MalformedPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
