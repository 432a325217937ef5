use thiserror::Error;

#[derive(Error, Debug)]
pub enum TmplDiffError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("content stream unavailable: {0}")]
    StreamUnavailable(String),
    #[error("invalid block range: {0}")]
    InvalidBlockRange(String),
    #[error("unknown region: {0}")]
    UnknownRegion(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TmplDiffError>;

impl From<anyhow::Error> for TmplDiffError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
