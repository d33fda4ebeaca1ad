//! Error types. Conflicts are not errors; see [`Conflict`](crate::types::Conflict).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },

    #[error("inconsistent indentation at line {line}")]
    Indentation { line: usize },

    #[error("language error: {0}")]
    Language(String),

    #[error("parse failed")]
    ParseFailed,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("cannot parse {side} version: {source}")]
    Parse {
        side: &'static str,
        #[source]
        source: ParseError,
    },

    /// An applied edit produced source that no longer parses. Engine defect,
    /// never a user-level conflict.
    #[error("edit `{action}` produced invalid source:\n{snippet}")]
    InvalidResult { action: String, snippet: String },
}

pub type Result<T> = std::result::Result<T, MergeError>;
