//! Streamer errors.
//!
//! Every failure aborts the pass that hit it: a malformed section is never
//! partially applied.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("truncated {stream} stream at offset {offset}")]
    Truncated { stream: &'static str, offset: usize },

    #[error("overlong varint in {stream} stream at offset {offset}")]
    Overlong { stream: &'static str, offset: usize },

    #[error("unknown tag {tag} in {context}")]
    UnknownTag { tag: u64, context: &'static str },

    #[error("back-reference to index {index}, only {len} nodes known")]
    BadReference { index: u64, len: usize },

    #[error("section version {major}.{minor} unsupported, expected {expected_major}.x")]
    VersionMismatch {
        major: u16,
        minor: u16,
        expected_major: u16,
    },

    #[error("section kind {found}, expected {expected}")]
    BadSectionKind { found: u16, expected: u16 },

    #[error("missing section {0}")]
    MissingSection(String),

    #[error("malformed real constant {0:?}")]
    BadReal(String),

    #[error("bad string reference {offset}")]
    BadString { offset: u64 },

    #[error("{what} index {index} out of range ({len} entries)")]
    IndexOutOfRange {
        what: &'static str,
        index: i64,
        len: usize,
    },

    #[error("inconsistent input: {0}")]
    Consistency(String),

    #[error("symbol {symbol} defined more than once")]
    AlreadyDefined { symbol: String },

    #[error("symbol {symbol} is a function in one unit and a variable in another")]
    SymbolKindConflict { symbol: String },

    #[error("resolution file line {line}: {message}")]
    BadResolution { line: usize, message: String },

    #[error("function body failed verification: {0}")]
    Verify(#[from] ltoir::VerifyError),

    #[error("object file: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency(message.into())
    }

    pub fn out_of_range(what: &'static str, index: impl Into<i64>, len: usize) -> Self {
        Self::IndexOutOfRange {
            what,
            index: index.into(),
            len,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
