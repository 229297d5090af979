//! Error types for SFTP client operations
//!
//! This module defines the error taxonomy surfaced by the SFTP session and
//! its file/directory facades. Errors are returned to the caller unchanged;
//! the client performs no automatic retry.

use super::types::Status;
use std::fmt;

/// Result type for SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP client errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The session has been torn down; every pending waiter observes this
    ConnectionClosed,

    /// The server did not answer within the handshake deadline
    MissingResponse,

    /// The server negotiated an SFTP version below 3
    UnsupportedVersion(u32),

    /// A reply arrived whose shape does not match what the request expects
    InvalidResponse,

    /// A well-formed STATUS reply with a non-OK code
    Status(Status),

    /// A handle-scoped operation was attempted after `close()`
    FileHandleInvalid,

    /// The peer sent bytes that do not decode as an SFTP packet; fatal to
    /// the session
    Malformed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionClosed => write!(f, "SFTP session closed"),
            Error::MissingResponse => write!(f, "no response from server before deadline"),
            Error::UnsupportedVersion(v) => {
                write!(f, "server negotiated unsupported SFTP version {}", v)
            }
            Error::InvalidResponse => write!(f, "response type does not match request"),
            Error::Status(status) => write!(f, "server returned {}", status),
            Error::FileHandleInvalid => write!(f, "file handle already closed"),
            Error::Malformed(msg) => write!(f, "malformed packet: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
