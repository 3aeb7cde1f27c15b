use log::error;
use snafu::Snafu;

pub use crate::errors::Error::*;
use crate::errors::ProtocolError::{NetworkError, UnexpectedData};
use crate::errors::StorageError::Unavailable;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Runtime error: the task registry or the actuation lock has been closed.
    RuntimeError,
    /// Protocol error: {source}.
    ProtocolError { source: ProtocolError },
    /// Storage error: {source}.
    StorageError { source: StorageError },
    /// Invariant violation: {info}.
    InvariantViolation { info: String },
    /// Configuration error: {info}.
    ConfigError { info: String },
    /// Unknown error: {info}.
    Unknown { info: String },
}

impl Error {
    /// Indicates if the failed operation is worth retrying as is (see [`ProtocolError::is_transient()`]).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProtocolError { source } => source.is_transient(),
            _ => false,
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(value: ProtocolError) -> Self {
        Self::ProtocolError { source: value }
    }
}

impl From<StorageError> for Error {
    fn from(value: StorageError) -> Self {
        Self::StorageError { source: value }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) => Self::ProtocolError {
                source: ProtocolError::UnexpectedStatus {
                    status: status.as_u16(),
                },
            },
            None if error.is_decode() => Self::ProtocolError {
                source: UnexpectedData {
                    info: error.to_string(),
                },
            },
            None => Self::ProtocolError {
                source: NetworkError {
                    info: error.to_string(),
                },
            },
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::StorageError {
            source: Unavailable {
                info: error.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::ProtocolError {
            source: UnexpectedData {
                info: error.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        error!("std::io error {:?}", error);
        Self::Unknown {
            info: error.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Unknown {
            info: error.to_string(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProtocolError {
    /// Remote DIO API unreachable - {info}
    NetworkError { info: String },
    /// Remote DIO API answered with status {status}
    UnexpectedStatus { status: u16 },
    /// Authentication token rejected by the remote DIO API
    AuthExpired,
    /// Unexpected data received - {info}
    UnexpectedData { info: String },
}

impl ProtocolError {
    /// Indicates if the failure is worth retrying: a network glitch or a non-2xx answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::UnexpectedStatus { .. })
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Persistence backend unavailable - {info}
    Unavailable { info: String },
    /// Table '{table}' does not exist
    MissingSchema { table: &'static str },
}
