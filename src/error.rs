//! Error types
//!
//! Errors surfaced by the relay. Nothing here is ever written back to a
//! client; errors end up in the log and, at worst, terminate the connection
//! that produced them.

use std::fmt;
use std::io;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket level failure (bind, accept, read, write)
    Io(io::Error),
    /// Configured separator does not encode to a single byte
    InvalidSeparator(char),
    /// Frame payload violates a protocol precondition
    Protocol(ProtocolError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidSeparator(c) => write!(
                f,
                "separator {:?} can not be used, only single byte separators are valid",
                c
            ),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::InvalidSeparator(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

/// Precondition violations found while scanning a frame payload
///
/// The payload scanner does not validate structure in general; these are
/// the points where it opened a span it could not close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An opening `{` or `[` without its matching closer
    UnbalancedDelimiter { open: char, at: usize },
    /// A `"DModel:` entry with no closing quote after it
    UnterminatedModelId { at: usize },
    /// A metadata marker not followed by a quoted key and an object
    MalformedMetadata { at: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnbalancedDelimiter { open, at } => {
                write!(f, "no matching closer for '{}' opened at offset {}", open, at)
            }
            ProtocolError::UnterminatedModelId { at } => {
                write!(f, "unterminated model id at offset {}", at)
            }
            ProtocolError::MalformedMetadata { at } => {
                write!(f, "metadata marker at offset {} has no object", at)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
