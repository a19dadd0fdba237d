use nom::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("parse error of kind {kind:?} at byte offset {offset}")]
    Parse { offset: usize, kind: ErrorKind },

    #[error("invalid revision number {0}")]
    InvalidNum(String),

    #[error("invalid date {0}")]
    InvalidDate(String),

    #[error("file has no head revision")]
    NoHead,

    #[error("unknown revision {0}")]
    UnknownRevision(String),

    #[error("invalid edit command on script line {line}")]
    EditCommand { line: usize },

    #[error("edit script wants {want} payload line(s), only {have} available")]
    EditPayload { have: usize, want: usize },

    #[error("edit command {command} out of range for a buffer of {lines} line(s)")]
    EditOutOfRange { command: String, lines: usize },
}
