//! Typed errors for extraction, indexing and embedding

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn a single source buffer into entities
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to load {language} grammar: {source}")]
    Grammar {
        language: String,
        #[source]
        source: tree_sitter::LanguageError,
    },

    #[error("parser produced no tree for {0} source")]
    ParseAborted(String),
}

/// Failure of one file inside an indexing run
#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to stat file: {0}")]
    Stat(#[source] std::io::Error),

    #[error("failed to read file: {0}")]
    Read(#[source] std::io::Error),

    #[error("file exceeds size limit ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("source is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Failures that abort a whole indexing run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot walk {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("indexing cancelled")]
    Cancelled,

    #[error("worker pool failure: {0}")]
    Worker(String),
}

/// Failure of a single embedding request
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    Decode(String),

    #[error("expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },
}
