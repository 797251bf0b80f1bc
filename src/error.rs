//! Error types for shellstream.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for shellstream operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid use of the API (wrong state, bad arguments)
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Shell stream errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Command execution errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Remote file operation errors
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Invalid use of the API. These are caller bugs: they are surfaced
/// synchronously and never retried.
#[derive(Error, Debug)]
pub enum UsageError {
    /// Operation requires a started stream
    #[error("Stream not started - call start() first")]
    NotStarted,

    /// Start was called on an already started stream
    #[error("Stream already started")]
    AlreadyStarted,

    /// A completion token was finalized more than once
    #[error("Operation already finalized")]
    OperationFinalized,

    /// A completion token was presented to a component that did not create it
    #[error("Operation token does not belong to this instance")]
    ForeignOperation,

    /// An expect call was made with an empty pattern list
    #[error("No patterns supplied")]
    NoPatterns,
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Shell stream errors (buffer management, lifecycle).
///
/// Elapsed expect deadlines are deliberately absent: a timed-out expect or
/// read-line returns `None`, it does not error.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The stream was stopped while the operation was pending
    #[error("Stream stopped")]
    Stopped,

    /// The transport closed the channel while the operation was pending
    #[error("Channel closed")]
    Closed,

    /// A completion token was abandoned by its producer
    #[error("Operation abandoned before completion")]
    Abandoned,

    /// The incoming buffer exceeded its growth bound with no pattern match
    #[error("Incoming buffer exceeded {limit} bytes with no match")]
    BufferOverflow { limit: usize },
}

/// Command execution errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The explicit timeout-sensitive execute path elapsed
    #[error("Command did not complete within {0:?}")]
    Timeout(Duration),

    /// An execution is already in progress on this command
    #[error("Command execution already in progress")]
    AlreadyExecuting,

    /// The exec channel closed before the command could be driven
    #[error("Exec channel closed")]
    ChannelClosed,
}

/// Remote file operation errors.
#[derive(Error, Debug)]
pub enum FileError {
    /// The file subsystem channel is closed
    #[error("Remote file subsystem closed")]
    Closed,

    /// The remote side rejected the request
    #[error("Remote file operation failed: {message}")]
    Remote { message: String },
}

/// Result type alias using shellstream's Error.
pub type Result<T> = std::result::Result<T, Error>;
