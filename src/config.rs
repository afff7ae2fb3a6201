//! Session configuration.
//!
//! Settings can be loaded from a TOML file; every field is optional:
//!
//! ```toml
//! # Shell spawned behind the pseudo-terminal
//! shell = "/system/bin/sh"
//!
//! # Home directory, created on start if missing
//! home = "/data/local/tmp/home"
//!
//! # Host name shown in the prompt
//! session_name = "pixel"
//!
//! # "intercept" runs built-ins, "passthrough" forwards lines to the shell
//! mode = "intercept"
//!
//! rows = 24
//! cols = 80
//! banner = true
//! ```

use crate::env::{DEFAULT_SESSION_NAME, DEFAULT_SHELL};
use crate::session::Mode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell spawned behind the pseudo-terminal.
    pub shell: String,
    /// Home directory and initial working directory.
    pub home: PathBuf,
    /// Host part of the prompt.
    pub session_name: String,
    /// How submitted lines are routed.
    pub mode: Mode,
    /// Initial terminal height.
    pub rows: u16,
    /// Initial terminal width.
    pub cols: u16,
    /// Show a welcome message before the first prompt.
    pub banner: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            home: default_home(),
            session_name: DEFAULT_SESSION_NAME.to_string(),
            mode: Mode::Intercept,
            rows: 24,
            cols: 80,
            banner: true,
        }
    }
}

impl SessionConfig {
    /// Load a configuration file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// The Android system shell when present, the POSIX one otherwise.
fn default_shell() -> String {
    if Path::new(DEFAULT_SHELL).exists() {
        DEFAULT_SHELL.to_string()
    } else {
        "/bin/sh".to_string()
    }
}

fn default_home() -> PathBuf {
    std::env::temp_dir().join("shell-session").join("home")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.mode, Mode::Intercept);
        assert_eq!(config.session_name, DEFAULT_SESSION_NAME);
        assert_eq!((config.rows, config.cols), (24, 80));
        assert!(config.banner);
        assert!(config.home.ends_with("shell-session/home"));
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        fs::write(
            &path,
            "shell = \"/bin/bash\"\nmode = \"passthrough\"\nbanner = false\n",
        )
        .unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.mode, Mode::Passthrough);
        assert!(!config.banner);
        assert_eq!(config.rows, 24);
    }

    #[test]
    fn load_reports_bad_input() {
        let dir = tempfile::tempdir().unwrap();

        let missing = SessionConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let path = dir.path().join("bad.toml");
        fs::write(&path, "mode = \"sideways\"\n").unwrap();
        let err = SessionConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
