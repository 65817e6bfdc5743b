use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no output files found in {}", directory.display())]
    NotFound { directory: PathBuf },
    #[error("syntax error while scanning {}: {reason}", path.display())]
    SyntaxMalformed { path: PathBuf, reason: String },
    #[error("malformed value while scanning {}: {reason}", path.display())]
    ValueMalformed { path: PathBuf, reason: String },
    #[error("failed to open results store {}: {source}", path.display())]
    StoreOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("results store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid table schema: {0}")]
    InvalidSchema(String),
    #[error("output files {} and {} share file id {id}", first.display(), second.display())]
    DuplicateFileId {
        id: u64,
        first: PathBuf,
        second: PathBuf,
    },
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::SyntaxMalformed { .. } => "syntax_malformed",
            Self::ValueMalformed { .. } => "value_malformed",
            Self::StoreOpen { .. } => "store_open_failure",
            Self::Store(_) => "store_error",
            Self::Io { .. } => "io_error",
            Self::InvalidSchema(_) => "invalid_schema",
            Self::DuplicateFileId { .. } => "duplicate_file_id",
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
