use thiserror::Error;

use crate::sink::SinkError;

/// Everything that can abort a visit. There is no per-file recovery: a single
/// corrupt RCS file or protocol hiccup fails the whole visit.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown revision {0}")]
    UnknownRevision(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<rcs_file::Error> for Error {
    fn from(e: rcs_file::Error) -> Self {
        match e {
            rcs_file::Error::UnknownRevision(rev) => Error::UnknownRevision(rev),
            rcs_file::Error::Io(e) => Error::Io(e),
            other => Error::Parse(other.to_string()),
        }
    }
}

impl From<rlog::Error> for Error {
    fn from(e: rlog::Error) -> Self {
        match e {
            rlog::Error::Io(e) => Error::Io(e),
            other => Error::Parse(other.to_string()),
        }
    }
}

impl From<cvs_client::Error> for Error {
    fn from(e: cvs_client::Error) -> Self {
        match e {
            cvs_client::Error::InvalidUrl(url) => {
                Error::NotFound(format!("invalid CVS origin URL '{}'", url))
            }
            cvs_client::Error::Connect { .. } => Error::NotFound(e.to_string()),
            cvs_client::Error::Io(e) => Error::Io(e),
            other => Error::Protocol(other.to_string()),
        }
    }
}

impl From<git_objects::Error> for Error {
    fn from(e: git_objects::Error) -> Self {
        match e {
            git_objects::Error::Io(e) => Error::Io(e),
            other => Error::Protocol(other.to_string()),
        }
    }
}
