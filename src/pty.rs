//! Boundary with the pseudo-terminal primitive.
//!
//! A session never allocates terminals itself. It asks a [`PtySpawner`] for a
//! child shell attached to a fresh PTY and receives a [`PtyProcess`]: the read
//! half of the terminal for the output pump, the write half for line intake,
//! and a [`ProcessHandle`] to control the child.

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair, PtySize};
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Everything needed to launch the shell behind a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Program to execute, e.g. `/system/bin/sh`.
    pub command: String,
    pub working_directory: PathBuf,
    /// `KEY=VALUE` entries; the child sees nothing else.
    pub environment: Vec<String>,
    pub rows: u16,
    pub cols: u16,
}

/// Control over a spawned child and its terminal.
pub trait ProcessHandle: Send {
    fn process_id(&self) -> Option<u32>;

    /// Whether the child has already terminated. Never blocks.
    fn has_exited(&mut self) -> bool;

    fn kill(&mut self) -> io::Result<()>;

    /// Reap the child.
    fn wait(&mut self) -> io::Result<()>;

    /// Change the terminal window size seen by the child.
    fn resize(&mut self, rows: u16, cols: u16) -> io::Result<()>;
}

/// A running child connected through a pseudo-terminal.
///
/// The reader and the writer are two ends of the same duplex stream; they may be
/// used concurrently from different threads.
pub struct PtyProcess {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub process: Box<dyn ProcessHandle>,
}

/// Allocates a PTY and starts a command on it.
pub trait PtySpawner {
    /// Fails when no terminal can be allocated or the command cannot be run.
    fn spawn(&self, request: &SpawnRequest) -> Result<PtyProcess>;
}

/// Spawner backed by the operating system's PTY implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<PtyProcess> {
        let pty_system = native_pty_system();

        let PtyPair { master, slave } = pty_system
            .openpty(pty_size(request.rows, request.cols))
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&request.command);
        cmd.cwd(&request.working_directory);
        cmd.env_clear();
        for entry in &request.environment {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }

        let child = slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", request.command))?;
        // Only the child keeps the slave side open, so its exit ends our reads.
        drop(slave);

        let reader = master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;
        let writer = master.take_writer().context("Failed to get PTY writer")?;

        tracing::debug!(pid = ?child.process_id(), command = %request.command, "spawned shell");

        Ok(PtyProcess {
            reader,
            writer,
            process: Box::new(NativeProcess { master, child }),
        })
    }
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

struct NativeProcess {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl ProcessHandle for NativeProcess {
    fn process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn wait(&mut self) -> io::Result<()> {
        self.child.wait().map(|_| ())
    }

    fn resize(&mut self, rows: u16, cols: u16) -> io::Result<()> {
        self.master.resize(pty_size(rows, cols)).map_err(io::Error::other)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    #[ignore = "needs a pseudo-terminal device"]
    fn native_spawn_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let request = SpawnRequest {
            command: "/bin/sh".to_string(),
            working_directory: dir.path().to_path_buf(),
            environment: vec!["PATH=/bin:/usr/bin".to_string(), "TERM=dumb".to_string()],
            rows: 24,
            cols: 80,
        };
        let mut pty = NativePtySpawner.spawn(&request).expect("spawn");
        pty.writer.write_all(b"echo pty-$((40+2))\nexit\n").unwrap();
        pty.writer.flush().unwrap();

        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            match pty.reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
            if String::from_utf8_lossy(&seen).contains("pty-42") {
                break;
            }
        }
        assert!(String::from_utf8_lossy(&seen).contains("pty-42"));
        pty.process.wait().unwrap();
        assert!(pty.process.has_exited());
    }

    #[test]
    fn spawning_a_missing_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let request = SpawnRequest {
            command: "/definitely/not/a/shell".to_string(),
            working_directory: dir.path().to_path_buf(),
            environment: Vec::new(),
            rows: 24,
            cols: 80,
        };
        assert!(NativePtySpawner.spawn(&request).is_err());
    }
}
