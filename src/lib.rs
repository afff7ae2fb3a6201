//! Core of an interactive terminal session.
//!
//! A session owns a shell spawned behind a pseudo-terminal and routes every
//! line the user types either to a set of built-in commands implemented in
//! Rust or straight to that shell.
//!
//! The building blocks are small and usable on their own:
//!
//! - [`lexer`] splits a command line into words.
//! - [`Dispatcher`] runs built-in commands ([`builtin`]) against an
//!   [`Environment`], a per-session model of variables and working directory.
//! - [`pty`] is the boundary with the operating system's pseudo-terminals.
//! - [`Session`] ties everything together and reports output as
//!   [`SessionEvent`]s over a channel.
//!
//! The public modules [`command`] and [`env`] expose traits and types for
//! implementing your own commands.

pub mod builtin;
pub mod command;
pub mod config;
mod dispatcher;
pub mod env;
mod error;
pub mod lexer;
pub mod pty;
pub mod session;

pub use config::{ConfigError, SessionConfig};
/// The built-in command router.
///
/// See [`Dispatcher`] for the high-level API and examples.
pub use dispatcher::Dispatcher;
pub use env::Environment;
pub use error::SessionError;
pub use pty::{NativePtySpawner, PtySpawner};
pub use session::{Mode, Session, SessionEvent, SessionState, Submission};
