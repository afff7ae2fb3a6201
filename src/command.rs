use crate::env::Environment;
use std::io::{self, Write};
use thiserror::Error;

/// Reasons a built-in gives up.
///
/// The dispatcher renders every variant as a single `<command>: <message>` line,
/// so messages never carry the command name themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required operands are missing.
    #[error("{0}")]
    Usage(&'static str),
    /// The request was understood but cannot be carried out, e.g. a missing path.
    #[error("{0}")]
    Failed(String),
    /// Any other filesystem failure.
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Result type returned by built-in handlers.
pub type Result<T = ()> = std::result::Result<T, CommandError>;

/// A command implemented in-process.
///
/// Handlers never spawn processes. They read the environment, may move the
/// working directory, touch the filesystem and write their text output to
/// `stdout`. Per-path problems in multi-operand commands are written to
/// `stdout` as ordinary lines so the remaining operands still get processed;
/// anything that ends the command early is returned as a [`CommandError`].
pub trait BuiltinCommand: Send + Sync {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name(&self) -> &'static str;

    /// Executes the command with the arguments that followed its name.
    fn execute(&self, args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result;
}
