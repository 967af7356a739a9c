//! Crate-wide error taxonomy (spec §7).

use crate::codec::ErrorCode;
use std::fmt;
use std::io;

/// Errors surfaced by a reader or writer (C2). Translated to a wire `ERROR`
/// packet by whichever layer terminates the session on their account.
#[derive(Debug)]
pub enum BackingError {
    FileNotFound,
    AccessViolation,
    DiskFull,
    FileExists,
}

impl fmt::Display for BackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BackingError::FileNotFound => "file not found",
            BackingError::AccessViolation => "access violation",
            BackingError::DiskFull => "disk full",
            BackingError::FileExists => "file already exists",
        };
        f.write_str(msg)
    }
}

#[derive(Debug)]
pub enum Error {
    /// Opcode could not be extracted from the datagram.
    WireProtocol,
    /// Structural failure within a known opcode's payload.
    PayloadDecode,
    /// Duplicate option name or a name with no paired value.
    OptionsDecode,
    /// Opcode outside 1..6.
    InvalidOpcode,
    /// ERROR packet's code outside 0..8.
    InvalidErrorCode,
    /// Reader/writer failure.
    BackingStore(BackingError),
    /// Retransmission schedule exhausted with no progress.
    Timeout,
    /// Transport-level I/O failure.
    Io(io::Error),
}

impl Error {
    /// The wire `ERROR` code this error maps to, if any. Decode-level errors
    /// and timeouts are never put on the wire (spec §7): decode errors are
    /// dropped silently and timeouts tear the session down without an
    /// `ERROR` datagram.
    pub fn wire_error_code(&self) -> Option<ErrorCode> {
        match self {
            Error::BackingStore(BackingError::FileNotFound) => Some(ErrorCode::FileNotFound),
            Error::BackingStore(BackingError::AccessViolation) => Some(ErrorCode::AccessViolation),
            Error::BackingStore(BackingError::DiskFull) => Some(ErrorCode::DiskFull),
            Error::BackingStore(BackingError::FileExists) => Some(ErrorCode::FileAlreadyExists),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::WireProtocol => f.write_str("failed to extract opcode"),
            Error::PayloadDecode => f.write_str("malformed packet payload"),
            Error::OptionsDecode => f.write_str("malformed option list"),
            Error::InvalidOpcode => f.write_str("invalid opcode"),
            Error::InvalidErrorCode => f.write_str("invalid error code"),
            Error::BackingStore(e) => write!(f, "backing store error: {e}"),
            Error::Timeout => f.write_str("retransmission schedule exhausted"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<BackingError> for Error {
    fn from(e: BackingError) -> Self {
        Error::BackingStore(e)
    }
}
