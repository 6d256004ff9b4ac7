//! Error types for ferroring

use thiserror::Error;

/// Result type for communicator and session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for communicator and session operations
#[derive(Error, Debug)]
pub enum Error {
    /// Socket failure (bind, connect, accept, short read, peer gone)
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid rank passed to a primitive under strict routing
    #[error("Invalid rank: {0}")]
    InvalidRank(i32),

    /// Invalid count specified
    #[error("Invalid count: {0}")]
    InvalidCount(i64),

    /// Buffer does not match the chunk plan
    #[error("Invalid buffer")]
    InvalidBuffer,

    /// Malformed registration or neighbor record
    #[error("Registration error: {0}")]
    Registration(String),

    /// A peer sent something out of sequence
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operator or broadcast named an unknown algorithm
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The command source went away before any command was chosen
    #[error("Command source closed before a command was chosen")]
    CommandSourceClosed,

    /// Environment or flag value could not be used
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when the error means the peer closed its end of the link.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Error::Io(e) if matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            )
        )
    }
}
