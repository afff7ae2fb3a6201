use crate::builtin;
use crate::command::BuiltinCommand;
use crate::env::Environment;
use crate::lexer;
use std::collections::HashMap;
use tracing::debug;

/// Routes command lines to built-in handlers.
///
/// The dispatcher owns a flat table from command name to handler and never
/// fails: unknown names and handler errors both come back as a single
/// `<name>: <message>` line inside the returned text.
///
/// Example
/// ```
/// use shell_session::{Dispatcher, Environment};
/// let dir = std::env::temp_dir();
/// let mut env = Environment::new(&dir);
/// let sh = Dispatcher::default();
/// assert_eq!(sh.execute("echo hello world", &mut env), "hello world\n");
/// assert_eq!(sh.execute("zzz", &mut env), "zzz: command not found\n");
/// ```
pub struct Dispatcher {
    commands: HashMap<&'static str, Box<dyn BuiltinCommand>>,
}

impl Dispatcher {
    /// Create a dispatcher from a custom set of commands. Later entries replace
    /// earlier ones with the same name.
    pub fn new(commands: Vec<Box<dyn BuiltinCommand>>) -> Self {
        Self {
            commands: commands.into_iter().map(|c| (c.name(), c)).collect(),
        }
    }

    /// Whether `name` is handled in-process.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Tokenize `line`, run the named built-in against `env` and return its text.
    ///
    /// An empty line yields an empty string.
    pub fn execute(&self, line: &str, env: &mut Environment) -> String {
        let tokens = lexer::tokenize(line);
        let Some((name, args)) = tokens.split_first() else {
            return String::new();
        };
        let Some(cmd) = self.commands.get(name.as_str()) else {
            debug!(command = %name, "unknown command");
            return format!("{}: command not found\n", name);
        };

        debug!(command = %name, args = args.len(), "running built-in");
        let mut out = Vec::new();
        if let Err(e) = cmd.execute(args, &mut out, env) {
            debug!(command = %name, error = %e, "built-in failed");
            out.extend_from_slice(format!("{}: {}\n", name, e).as_bytes());
        }
        match String::from_utf8(out) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

impl Default for Dispatcher {
    /// A dispatcher with every built-in of this crate.
    fn default() -> Self {
        Self::new(builtin::all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Environment, Dispatcher) {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = Environment::new(dir.path());
        (dir, env, Dispatcher::default())
    }

    #[test]
    fn empty_line_yields_nothing() {
        let (_dir, mut env, sh) = setup();
        assert_eq!(sh.execute("", &mut env), "");
        assert_eq!(sh.execute("   ", &mut env), "");
    }

    #[test]
    fn unknown_command() {
        let (_dir, mut env, sh) = setup();
        assert_eq!(sh.execute("zzz", &mut env), "zzz: command not found\n");
        assert_eq!(sh.execute("exit", &mut env), "exit: command not found\n");
    }

    #[test]
    fn echo_exact_output() {
        let (_dir, mut env, sh) = setup();
        assert_eq!(sh.execute("echo hello world", &mut env), "hello world\n");
        assert_eq!(sh.execute("echo 'a  b' \"c\"", &mut env), "a  b c\n");
    }

    #[test]
    fn handler_errors_are_prefixed_with_command_name() {
        let (_dir, mut env, sh) = setup();
        assert_eq!(sh.execute("cat", &mut env), "cat: missing file operand\n");
        assert_eq!(sh.execute("cd nowhere", &mut env), "cd: nowhere: No such directory\n");
        assert_eq!(
            sh.execute("rm ghost", &mut env),
            "rm: cannot remove 'ghost': No such file or directory\n"
        );
        assert_eq!(sh.execute("rm -f ghost", &mut env), "");
        assert_eq!(sh.execute("grep x", &mut env), "grep: missing pattern or file\n");
    }

    #[test]
    fn io_failures_are_rendered_not_propagated() {
        let (dir, mut env, sh) = setup();
        fs::write(dir.path().join("file"), "").unwrap();
        // Creating a file below a regular file fails inside the filesystem.
        let out = sh.execute("touch file/child", &mut env);
        assert!(out.starts_with("touch: "), "{out:?}");
        assert!(out.ends_with('\n'));
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn partial_output_is_kept_before_error() {
        let (dir, mut env, sh) = setup();
        fs::write(dir.path().join("a.txt"), "A\n").unwrap();
        assert_eq!(
            sh.execute("cat a.txt b.txt", &mut env),
            "A\ncat: b.txt: No such file or directory\n"
        );
    }

    #[test]
    fn mkdir_then_cd_then_pwd() {
        let (_dir, mut env, sh) = setup();
        assert_eq!(sh.execute("mkdir -p a/b/c", &mut env), "");
        assert_eq!(sh.execute("cd a/b/c", &mut env), "");
        let pwd = sh.execute("pwd", &mut env);
        assert!(pwd.ends_with("/a/b/c\n"), "{pwd:?}");
    }

    #[test]
    fn cd_round_trip_is_idempotent() {
        let (_dir, mut env, sh) = setup();
        sh.execute("mkdir D", &mut env);

        sh.execute("cd D", &mut env);
        let direct = sh.execute("pwd", &mut env);

        sh.execute("cd ..", &mut env);
        sh.execute("cd D", &mut env);
        let round_trip = sh.execute("pwd", &mut env);

        assert_eq!(direct, round_trip);
    }

    #[test]
    fn export_then_env() {
        let (_dir, mut env, sh) = setup();
        assert_eq!(sh.execute("export FOO=bar", &mut env), "");
        assert!(sh.execute("env", &mut env).lines().any(|l| l == "FOO=bar"));
    }

    #[test]
    fn wc_reports_counts_and_path() {
        let (dir, mut env, sh) = setup();
        fs::write(dir.path().join("f.txt"), "a b\nc\n").unwrap();
        assert_eq!(sh.execute("wc f.txt", &mut env), "2 3 6 f.txt\n");
    }

    #[test]
    fn custom_command_table() {
        let (_dir, mut env, _) = setup();
        let sh = Dispatcher::new(vec![Box::new(builtin::Echo)]);
        assert!(sh.is_builtin("echo"));
        assert!(!sh.is_builtin("ls"));
        assert_eq!(sh.execute("ls", &mut env), "ls: command not found\n");
    }
}
