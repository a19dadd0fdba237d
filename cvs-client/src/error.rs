use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid CVS origin URL '{0}'")]
    InvalidUrl(String),

    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("pserver authentication failed for {0}")]
    AuthFailed(String),

    #[error("error spawning {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CVS protocol error: {0}")]
    Protocol(String),

    #[error("could not terminate the server subprocess within {0} seconds")]
    ShutdownTimeout(u64),
}

impl Error {
    pub(crate) fn protocol(context: &str, line: &[u8]) -> Self {
        Self::Protocol(format!("{}: {}", context, String::from_utf8_lossy(line)))
    }
}
