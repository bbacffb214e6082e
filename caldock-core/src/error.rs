//! Error types for the caldock ecosystem.

use thiserror::Error;

/// Errors that can occur in conduit operations.
///
/// `Store` and `Io` are fatal to the running sync pass: the session moves to
/// its failed state and the previously persisted identifier map is left
/// untouched. Everything else is recovered locally (the offending record or
/// rule is skipped or degraded) and surfaced through the pass report.
#[derive(Error, Debug)]
pub enum ConduitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Calendar store error: {0}")]
    Store(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("ICS generation error: {0}")]
    IcsGenerate(String),

    #[error("Device record decode error: {0}")]
    RecordDecode(String),

    #[error("Device record encode error: {0}")]
    RecordEncode(String),

    #[error("Unsupported recurrence: {0}")]
    UnsupportedRecurrence(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for conduit operations.
pub type ConduitResult<T> = Result<T, ConduitError>;
