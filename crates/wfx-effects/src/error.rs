//! Error types surfaced by the effect compiler.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EffectError>;

#[derive(Error, Debug)]
pub enum EffectError {
    /// Generic misuse or unexpected state.
    #[error("parse error: {0}")]
    Parse(String),

    /// Syntax error in parsed input, with the source location resolved from
    /// the offending lex block.
    #[error("{path}:{line}: {message}")]
    Syntax {
        message: String,
        path: String,
        line: u32,
    },

    /// Failure from the compile/reflect backend, diagnostic carried verbatim.
    #[error("shader backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EffectError {
    pub fn parse(msg: impl Into<String>) -> Self {
        EffectError::Parse(msg.into())
    }

    pub fn syntax(msg: impl Into<String>, path: impl Into<String>, line: u32) -> Self {
        EffectError::Syntax {
            message: msg.into(),
            path: path.into(),
            line,
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        EffectError::Backend(msg.into())
    }
}

/// Cache load failures. Never fatal: the builder logs these and falls back to
/// full reprocessing.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("unexpected end of cache data")]
    Truncated,

    #[error("cache schema mismatch: {0}")]
    Schema(String),

    #[error("cache platform mismatch")]
    PlatformMismatch,

    #[error("cache decompression failed: {0}")]
    Decompress(String),
}
