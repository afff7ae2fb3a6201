use anyhow::{Context, Result};
use argh::FromArgs;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use shell_session::{Mode, NativePtySpawner, Session, SessionConfig, SessionError, SessionEvent, Submission};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;
use tracing::{debug, info};

/// How long the shell may stay silent before its output is considered complete.
const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Interactive terminal session with built-in commands.
#[derive(FromArgs)]
struct Args {
    /// path to a TOML configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// home directory of the session
    #[argh(option)]
    home: Option<PathBuf>,

    /// shell spawned behind the terminal
    #[argh(option)]
    shell: Option<String>,

    /// forward every line to the shell instead of running built-ins
    #[argh(switch)]
    passthrough: bool,
}

fn main() -> Result<()> {
    init_logging();
    let args: Args = argh::from_env();
    let config = load_config(&args)?;

    let (tx, events) = mpsc::channel();
    let mut session = Session::new(&config, tx)?;
    session.start(&NativePtySpawner)?;

    let mut editor = DefaultEditor::new().context("Failed to initialise line editor")?;
    let mut console = Console::default();
    loop {
        let prompt = console.drain(&events, session.mode())?;
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read line"),
        };
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }
        if session.mode() == Mode::Passthrough {
            console.expect_echo(line.trim());
        }

        match session.submit(&line) {
            Ok(Submission::Handled) => {}
            Ok(Submission::Exit) => break,
            Err(SessionError::Stream(e)) => eprintln!("shell-session: {}", e),
            Err(e) => return Err(e.into()),
        }
    }

    session.shutdown();
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shell_session=info,warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(true))
        .with(filter)
        .init();

    info!("shell-session v{} starting up", env!("CARGO_PKG_VERSION"));
}

/// Command line flags take precedence over the configuration file.
fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(home) = &args.home {
        config.home = home.clone();
    }
    if let Some(shell) = &args.shell {
        config.shell = shell.clone();
    }
    if args.passthrough {
        config.mode = Mode::Passthrough;
    }
    Ok(config)
}

/// Prints session output. The unfinished last line is handed back so the line
/// editor can use it as its prompt.
#[derive(Default)]
struct Console {
    pending: String,
    echo: Option<String>,
}

impl Console {
    /// The terminal echoes what was typed; skip it once. The echo may be split
    /// across several chunks and is held until its line break has been seen.
    fn expect_echo(&mut self, line: &str) {
        self.echo = Some(format!("{}\r\n", line));
    }

    fn drain(&mut self, events: &Receiver<SessionEvent>, mode: Mode) -> io::Result<String> {
        loop {
            // Built-in replies arrive before `submit` returns; the shell needs time.
            let event = match mode {
                Mode::Intercept => events.try_recv().ok(),
                Mode::Passthrough => events.recv_timeout(QUIET_PERIOD).ok(),
            };
            match event {
                Some(SessionEvent::Output(text)) => self.push(&text),
                Some(SessionEvent::PumpStopped) => info!("shell output ended"),
                Some(SessionEvent::Closed) | None => break,
            }
        }

        let mut stdout = io::stdout().lock();
        if let Some(end) = self.pending.rfind('\n') {
            stdout.write_all(self.pending[..=end].as_bytes())?;
            self.pending.drain(..=end);
        }
        stdout.flush()?;
        Ok(std::mem::take(&mut self.pending))
    }

    fn push(&mut self, mut text: &str) {
        if let Some(echo) = self.echo.as_mut() {
            let common = echo
                .bytes()
                .zip(text.bytes())
                .take_while(|(a, b)| a == b)
                .count();
            if common == echo.len() {
                text = &text[common..];
                self.echo = None;
            } else if common == text.len() {
                echo.drain(..common);
                text = "";
            } else {
                debug!("terminal output does not start with the typed line, showing it as is");
                self.echo = None;
            }
        }
        self.pending.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console_expecting(line: &str) -> Console {
        let mut console = Console::default();
        console.expect_echo(line);
        console
    }

    #[test]
    fn echo_is_stripped_once() {
        let mut console = console_expecting("ls");
        console.push("ls\r\nfile.txt\r\n$ ");
        assert_eq!(console.pending, "file.txt\r\n$ ");
        assert!(console.echo.is_none());

        console.push("ls\r\n");
        assert!(console.pending.ends_with("$ ls\r\n"));
    }

    #[test]
    fn echo_split_across_chunks() {
        let mut console = console_expecting("echo hi");
        console.push("ech");
        console.push("o h");
        assert_eq!(console.pending, "");
        assert_eq!(console.echo.as_deref(), Some("i\r\n"));

        console.push("i\r\nhi\r\n");
        assert_eq!(console.pending, "hi\r\n");
        assert!(console.echo.is_none());
    }

    #[test]
    fn unexpected_output_is_kept() {
        let mut console = console_expecting("ls");
        console.push("bash: warning\r\n");
        assert_eq!(console.pending, "bash: warning\r\n");
        assert!(console.echo.is_none());
    }

    #[test]
    fn flags_override_config() {
        let args = Args {
            config: None,
            home: Some(PathBuf::from("/tmp/h")),
            shell: Some("/bin/bash".to_string()),
            passthrough: true,
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.home, PathBuf::from("/tmp/h"));
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.mode, Mode::Passthrough);
    }
}
