use thiserror::Error;

/// Errors surfaced by the transport and the device facade.
#[derive(Debug, Error)]
pub enum Error {
    /// Not connected, open/handshake failure, device not found, or the link
    /// went away while a caller was waiting.
    #[error("connection error: {0}")]
    Connection(String),
    /// Unsupported or malformed command, rejected before any I/O.
    #[error("command error: {0}")]
    Command(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("response error: {0}")]
    Response(String),
}

/// Fieldless view of [`Error`] for callers that branch on the kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Command,
    Timeout,
    Response,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_) => ErrorKind::Connection,
            Error::Command(_) => ErrorKind::Command,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Response(_) => ErrorKind::Response,
        }
    }

    pub(crate) fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Error::Connection(format!("{context}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
