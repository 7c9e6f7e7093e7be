use thiserror::Error;

use crate::book::ChapterId;

/// Invariant violations in the calling code. These are never recovered
/// from locally; the offending pair or chapter is abandoned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("chapters belong to different books: {left} vs {right}")]
    DifferentBooks { left: ChapterId, right: ChapterId },
    #[error("cross-reference of chapter {0} with itself")]
    SelfReference(ChapterId),
    #[error("chapter {earlier} does not precede chapter {later} in book order")]
    Backward { earlier: ChapterId, later: ChapterId },
}

#[derive(Error, Debug)]
pub enum CardsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("invalid book: {0}")]
    InvalidBook(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("unsupported interchange document: {0}")]
    Interchange(String),
    #[error("analysis cancelled")]
    Cancelled,
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CardsError>;

impl From<anyhow::Error> for CardsError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
