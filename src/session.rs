//! Session orchestration.
//!
//! A [`Session`] owns one shell running behind a pseudo-terminal. A background
//! pump thread reads whatever the shell prints and forwards it as
//! [`SessionEvent::Output`] chunks, while the host submits command lines with
//! [`Session::submit`]. Depending on the [`Mode`] a line is either answered by
//! the built-in [`Dispatcher`] or written to the shell.
//!
//! Lifecycle: `Starting -> Running -> Terminating -> Closed`.

use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use crate::env::Environment;
use crate::error::SessionError;
use crate::pty::{ProcessHandle, PtySpawner, SpawnRequest};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Line that ends the session instead of being executed.
pub const EXIT_COMMAND: &str = "exit";

const BANNER: &str = concat!(
    "Welcome to shell-session ",
    env!("CARGO_PKG_VERSION"),
    "\nType 'help' for available commands\n\n"
);

const READ_BUFFER_SIZE: usize = 4096;

/// How long the child gets to honour `exit` before it is killed.
const EXIT_GRACE: Duration = Duration::from_millis(100);
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Where submitted lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Lines are executed by the built-in commands.
    #[default]
    Intercept,
    /// Lines are written to the shell behind the terminal.
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Terminating,
    Closed,
}

/// Messages delivered to the presentation side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Text to display, ANSI sequences included.
    Output(String),
    /// The shell's output stream ended. Built-ins keep working.
    PumpStopped,
    /// The session has been torn down.
    Closed,
}

/// Outcome of [`Session::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Handled,
    /// The line was `exit`; the session is closed now.
    Exit,
}

struct Connection {
    writer: Box<dyn Write + Send>,
    process: Box<dyn ProcessHandle>,
    pump: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl Connection {
    fn close(mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Err(e) = self
            .writer
            .write_all(format!("{EXIT_COMMAND}\n").as_bytes())
            .and_then(|()| self.writer.flush())
        {
            debug!(error = %e, "could not ask the shell to exit");
        }
        drop(self.writer);

        let deadline = Instant::now() + EXIT_GRACE;
        while !self.process.has_exited() && Instant::now() < deadline {
            thread::sleep(EXIT_POLL);
        }
        if !self.process.has_exited() {
            if let Err(e) = self.process.kill() {
                debug!(error = %e, "failed to kill shell");
            }
        }
        if let Err(e) = self.process.wait() {
            debug!(error = %e, "failed to reap shell");
        }
        drop(self.process);

        // The pump may still sit in a blocking read; it exits on its own once
        // the terminal is gone.
        if let Some(pump) = self.pump.take() {
            if pump.is_finished() {
                let _ = pump.join();
            }
        }
    }
}

/// An interactive session: one shell, one environment, one output channel.
pub struct Session {
    env: Environment,
    dispatcher: Dispatcher,
    mode: Mode,
    state: SessionState,
    shell: String,
    rows: u16,
    cols: u16,
    banner: bool,
    events: Sender<SessionEvent>,
    connection: Option<Connection>,
}

impl Session {
    /// Prepare a session. The home directory is created when missing; nothing
    /// is spawned until [`Session::start`].
    pub fn new(config: &SessionConfig, events: Sender<SessionEvent>) -> Result<Self, SessionError> {
        fs::create_dir_all(&config.home)
            .with_context(|| format!("Failed to create home directory {}", config.home.display()))
            .map_err(SessionError::Startup)?;

        let env = Environment::new(&config.home).with_session_name(config.session_name.as_str());
        Ok(Self {
            env,
            dispatcher: Dispatcher::default(),
            mode: config.mode,
            state: SessionState::Starting,
            shell: config.shell.clone(),
            rows: config.rows,
            cols: config.cols,
            banner: config.banner,
            events,
            connection: None,
        })
    }

    /// Spawn the shell and start pumping its output.
    ///
    /// A spawn failure is fatal: the session moves straight to `Closed`.
    pub fn start(&mut self, spawner: &dyn PtySpawner) -> Result<(), SessionError> {
        match self.state {
            SessionState::Starting => {}
            SessionState::Running => return Err(SessionError::AlreadyStarted),
            SessionState::Terminating | SessionState::Closed => return Err(SessionError::Closed),
        }

        let request = SpawnRequest {
            command: self.shell.clone(),
            working_directory: self.env.cwd().to_path_buf(),
            environment: self.env.child_environment(),
            rows: self.rows,
            cols: self.cols,
        };
        let pty = match spawner.spawn(&request) {
            Ok(pty) => pty,
            Err(e) => {
                warn!(shell = %self.shell, error = %format!("{e:#}"), "failed to start shell");
                self.state = SessionState::Closed;
                return Err(SessionError::Startup(e));
            }
        };
        let pid = pty.process.process_id();

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = thread::Builder::new().name("pty-pump".to_string()).spawn({
            let reader = pty.reader;
            let events = self.events.clone();
            let stop = Arc::clone(&stop);
            move || pump(reader, events, stop)
        });
        let pump = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let mut process = pty.process;
                let _ = process.kill();
                let _ = process.wait();
                self.state = SessionState::Closed;
                return Err(SessionError::Startup(
                    anyhow::Error::new(e).context("Failed to start output pump"),
                ));
            }
        };

        self.connection = Some(Connection {
            writer: pty.writer,
            process: pty.process,
            pump: Some(pump),
            stop,
        });
        self.state = SessionState::Running;
        info!(shell = %self.shell, pid = ?pid, mode = ?self.mode, "session started");

        let mut greeting = String::new();
        if self.banner {
            greeting.push_str(BANNER);
        }
        if self.mode == Mode::Intercept {
            greeting.push_str(&self.env.prompt());
        }
        if !greeting.is_empty() {
            self.emit(greeting);
        }
        Ok(())
    }

    /// Handle one line typed by the user.
    ///
    /// In intercept mode the built-in output and the refreshed prompt are sent
    /// as a single [`SessionEvent::Output`] chunk.
    pub fn submit(&mut self, line: &str) -> Result<Submission, SessionError> {
        match self.state {
            SessionState::Running => {}
            SessionState::Starting => return Err(SessionError::NotStarted),
            SessionState::Terminating | SessionState::Closed => return Err(SessionError::Closed),
        }

        let line = line.trim();
        if line == EXIT_COMMAND {
            info!("exit requested");
            self.shutdown();
            return Ok(Submission::Exit);
        }

        match self.mode {
            Mode::Intercept => {
                let mut reply = self.dispatcher.execute(line, &mut self.env);
                self.env.sync_pwd();
                reply.push_str(&self.env.prompt());
                self.emit(reply);
            }
            Mode::Passthrough => self.forward(line)?,
        }
        Ok(Submission::Handled)
    }

    fn forward(&mut self, line: &str) -> Result<(), SessionError> {
        let conn = self.connection.as_mut().ok_or(SessionError::Closed)?;
        conn.writer
            .write_all(format!("{line}\n").as_bytes())
            .and_then(|()| conn.writer.flush())
            .map_err(|e| {
                warn!(error = %e, "failed to write to PTY");
                SessionError::Stream(e)
            })
    }

    fn emit(&self, text: String) {
        if self.events.send(SessionEvent::Output(text)).is_err() {
            debug!("presentation channel closed, dropping output");
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch routing. Entering intercept mode shows a fresh prompt.
    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode {
            return;
        }
        info!(from = ?self.mode, to = ?mode, "mode switched");
        self.mode = mode;
        if mode == Mode::Intercept && self.state == SessionState::Running {
            self.emit(self.env.prompt());
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn prompt(&self) -> String {
        self.env.prompt()
    }

    /// Process id of the shell, if one is running.
    pub fn process_id(&self) -> Option<u32> {
        self.connection.as_ref().and_then(|c| c.process.process_id())
    }

    /// Propagate a terminal size change to the shell.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<(), SessionError> {
        self.rows = rows;
        self.cols = cols;
        match self.connection.as_mut() {
            Some(conn) => conn.process.resize(rows, cols).map_err(SessionError::Stream),
            None => Ok(()),
        }
    }

    /// Tear the session down. Calling it again, or before [`Session::start`],
    /// is harmless.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Terminating;
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.state = SessionState::Closed;
        let _ = self.events.send(SessionEvent::Closed);
        info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pump(mut reader: Box<dyn Read + Send>, events: Sender<SessionEvent>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut decoder = Utf8Decoder::default();

    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reached end of stream");
                break;
            }
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && events.send(SessionEvent::Output(text)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "PTY read failed");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = events.send(SessionEvent::Output(rest));
    }
    let _ = events.send(SessionEvent::PumpStopped);
    info!("output pump stopped");
}

/// Incremental UTF-8 decoder.
///
/// Sequences cut by a read boundary are held back until the next chunk;
/// invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut input = self.pending.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - input.len();
        self.pending.drain(..consumed);
        out
    }

    /// Flush whatever is still held back.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
