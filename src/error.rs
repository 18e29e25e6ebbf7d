//! Error types for idxwalk.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no item names given")]
    InputEmpty,

    #[error("expected structure missing: {0}")]
    TargetStructureMissing(String),

    #[error("cannot walk item {item:?}: {reason}")]
    InvalidItem { item: String, reason: String },

    #[error("no walk in progress")]
    NoWorklist,

    #[error("invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::model::Phase,
        to: crate::model::Phase,
    },

    #[error("cursor moved underneath us: expected {expected}, found {found}")]
    CursorConflict { expected: usize, found: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
