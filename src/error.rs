use std::io;
use thiserror::Error;

use crate::protocol::{Status, StatusCode};

pub type ClientResult<T> = Result<T, Error>;

/// Enum for client errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The transport could not be established or was lost
    #[error("Connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },
    /// The operation needs a connected session
    #[error("Not connected")]
    NotConnected,
    /// The file-transfer subsystem could not be opened on a connected session
    #[error("Subsystem unavailable: {0}")]
    SubsystemUnavailable(String),
    /// Contains an error status reported by the remote side
    #[error("{0}")]
    Status(Status),
    /// Any errors related to I/O
    #[error("I/O: {0}")]
    IO(String),
    /// An exec or shell channel could not be opened
    #[error("Channel: {0}")]
    Channel(String),
    /// Tree removal ran out of its depth budget before the tree was empty
    #[error("Depth limit {max_depth} exceeded at {path}")]
    DepthExceeded { path: String, max_depth: usize },
    /// Configuration key that the client does not know
    #[error("Unknown option {0}")]
    UnknownOption(String),
    /// Configuration value of the wrong kind for its key
    #[error("Invalid value for {name}: {reason}")]
    InvalidOption { name: String, reason: String },
    /// Capability that the transport does not provide
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns `true` if the remote side reported a missing path
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status(status) if status.status_code == StatusCode::NoSuchFile)
    }

    /// Returns `true` if the remote side refused access
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Status(status) if status.status_code == StatusCode::PermissionDenied
        )
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

impl From<StatusCode> for Error {
    fn from(status_code: StatusCode) -> Self {
        Self::Status(status_code.into())
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::Status(Status::new(
                StatusCode::NoSuchFile,
                error.to_string(),
            )),
            io::ErrorKind::PermissionDenied => Self::Status(Status::new(
                StatusCode::PermissionDenied,
                error.to_string(),
            )),
            _ => Self::IO(error.to_string()),
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::Status(status) => match status.status_code {
                StatusCode::NoSuchFile => io::ErrorKind::NotFound,
                StatusCode::PermissionDenied => io::ErrorKind::PermissionDenied,
                StatusCode::Eof => io::ErrorKind::UnexpectedEof,
                _ => io::ErrorKind::Other,
            },
            Error::NotConnected => io::ErrorKind::NotConnected,
            _ => io::ErrorKind::Other,
        };
        Self::new(kind, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_meaning() {
        let error: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(error.is_not_found());

        let error: Error = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert!(error.is_permission_denied());

        let error: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(error, Error::IO(_)));
    }

    #[test]
    fn status_round_trips_through_io() {
        let error = Error::from(StatusCode::PermissionDenied);
        let io_error: io::Error = error.into();
        assert_eq!(io_error.kind(), io::ErrorKind::PermissionDenied);
    }
}
