use thiserror::Error;

use super::types::PageId;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum OxbowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool exhausted, no free or evictable frames")]
    PoolExhausted,

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("header page is full")]
    HeaderFull,

    #[error("index name too long: {0:?}")]
    NameTooLong(String),

    #[error("disk scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, OxbowError>;
