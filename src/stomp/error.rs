//! STOMP frame error types

use thiserror::Error;

/// Errors produced while decoding a broker frame
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The frame had no command line
    #[error("Frame is missing a command")]
    MissingCommand,

    /// The command is not one the client understands
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A header line had no `:` separator
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    /// A header used an escape sequence outside the STOMP 1.2 set
    #[error("Invalid header escape sequence in: {0}")]
    InvalidEscape(String),

    /// The frame was not terminated by a NUL octet
    #[error("Frame is not NUL-terminated")]
    Unterminated,

    /// `content-length` was not a number or exceeded the body
    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),
}

/// Result type for frame decoding
pub type FrameResult<T> = Result<T, FrameError>;
