use std::io;
use thiserror::Error;

/// Errors reported by a [`Session`](crate::Session).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The terminal or the shell could not be started. Fatal for the session.
    #[error("failed to start shell session: {0:#}")]
    Startup(anyhow::Error),

    /// Writing to the terminal failed while the session was running.
    #[error("PTY stream error: {0}")]
    Stream(#[source] io::Error),

    #[error("session has not been started")]
    NotStarted,

    #[error("session has already been started")]
    AlreadyStarted,

    #[error("session is closed")]
    Closed,
}
