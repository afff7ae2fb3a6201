use crate::command::{BuiltinCommand, CommandError, Result};
use crate::env::{DEFAULT_USER, Environment};
use argh::{EarlyExit, FromArgs};
use chrono::{DateTime, Local};
use regex::RegexBuilder;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Line count used by `head` and `tail` when `-n` is absent or unusable.
const DEFAULT_LINES: usize = 10;

/// Screen clear followed by cursor home.
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

const HELP: &str = "\
Built-in commands:
  cd [dir]         - Change directory
  pwd              - Print working directory
  ls [-la] [path]  - List directory contents
  cat <file>...    - Display file contents
  echo <text>      - Display text
  mkdir [-p] <dir> - Create directory
  rm [-rf] <path>  - Remove files/directories
  touch <file>     - Create empty file or update timestamp
  cp <src> <dst>   - Copy files
  mv <src> <dst>   - Move/rename files
  find [path]      - Find files
  grep [-i] <pat> <file>...
                   - Search in files
  head [-n N] <f>  - Show first lines of file
  tail [-n N] <f>  - Show last lines of file
  wc <file>        - Count lines, words, bytes
  env              - Show environment variables
  export KEY=VAL   - Set environment variable
  date             - Show current date/time
  whoami           - Show current user
  uname [-a]       - Show system information
  clear            - Clear screen
  help             - Show this help
  exit             - Exit shell
";

/// A built-in whose flags are declared with [`argh`].
///
/// Wrap it in [`Parsed`] to put it into a dispatch table.
pub trait ParsedCommand: FromArgs {
    /// Canonical name of the command, e.g. "ls".
    const NAME: &'static str;

    fn run(self, stdout: &mut dyn Write, env: &mut Environment) -> Result;
}

/// Parses the arguments of `T` on every call, then runs it.
///
/// `--help` prints the generated usage text; argument errors become a
/// [`CommandError::Failed`] carrying argh's message.
pub struct Parsed<T>(PhantomData<fn() -> T>);

impl<T> Parsed<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ParsedCommand> BuiltinCommand for Parsed<T> {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn execute(&self, args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let args = expand_clusters(args);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match T::from_args(&[T::NAME], &args) {
            Ok(cmd) => cmd.run(stdout, env),
            Err(EarlyExit { output, status: Ok(()) }) => {
                stdout.write_all(output.as_bytes())?;
                Ok(())
            }
            Err(EarlyExit { output, status: Err(()) }) => {
                Err(CommandError::Failed(output.trim_end().to_string()))
            }
        }
    }
}

/// Split clustered switches, so `-rf` reaches argh as `-r -f`. Arguments after
/// `--` and anything that is not purely letters (`-n5`, `--help`) pass through.
fn expand_clusters(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut options_done = false;
    for arg in args {
        if options_done || arg == "--" {
            options_done = true;
            out.push(arg.clone());
            continue;
        }
        match arg.strip_prefix('-') {
            Some(cluster) if cluster.len() > 1 && cluster.chars().all(|c| c.is_ascii_alphabetic()) => {
                out.extend(cluster.chars().map(|c| format!("-{}", c)));
            }
            _ => out.push(arg.clone()),
        }
    }
    out
}

fn display_name(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Print the current working directory.
pub struct Pwd;

impl BuiltinCommand for Pwd {
    fn name(&self) -> &'static str {
        "pwd"
    }

    fn execute(&self, _args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        writeln!(stdout, "{}", env.cwd().display())?;
        Ok(())
    }
}

/// Change the current working directory.
///
/// `~` and `~/...` expand to `HOME`; without a target the shell goes home.
pub struct Cd;

impl BuiltinCommand for Cd {
    fn name(&self) -> &'static str {
        "cd"
    }

    fn execute(&self, args: &[String], _stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let home = env.get_var("HOME").unwrap_or("/").to_string();
        let target = match args.first().map(String::as_str) {
            None | Some("~") => home,
            Some(t) => match t.strip_prefix("~/") {
                Some(rest) => format!("{}/{}", home.trim_end_matches('/'), rest),
                None => t.to_string(),
            },
        };

        let dir = env.resolve(&target);
        if dir.is_dir() && env.set_cwd(&dir) {
            Ok(())
        } else {
            Err(CommandError::Failed(format!("{}: No such directory", target)))
        }
    }
}

#[derive(FromArgs)]
/// list directory contents
#[argh(help_triggers("--help"))]
pub struct Ls {
    #[argh(switch, short = 'l')]
    /// use a long listing format
    pub long: bool,

    #[argh(switch, short = 'a')]
    /// do not ignore entries starting with .
    pub all: bool,

    #[argh(positional)]
    /// files or directories to list; defaults to the current directory
    pub paths: Vec<String>,
}

impl Ls {
    fn long_line(name: &str, meta: &fs::Metadata) -> Result<String> {
        let size = if meta.is_dir() { 4096 } else { meta.len() };
        let modified: DateTime<Local> = meta.modified()?.into();
        Ok(format!(
            "{} 1 root root {:>8} {} {}",
            permission_string(meta),
            size,
            modified.format("%b %d %H:%M"),
            name
        ))
    }
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o555 } else { 0o755 }
}

fn permission_string(meta: &fs::Metadata) -> String {
    let mode = mode_bits(meta);
    let mut s = String::with_capacity(10);
    s.push(if meta.is_dir() { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

impl ParsedCommand for Ls {
    const NAME: &'static str = "ls";

    fn run(self, stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let show_hidden = self.all;
        let long_format = self.long;
        let paths = if self.paths.is_empty() { vec![".".to_string()] } else { self.paths };

        for path in &paths {
            let target = env.resolve(path);
            let Ok(meta) = fs::metadata(&target) else {
                writeln!(stdout, "ls: cannot access '{}': No such file or directory", path)?;
                continue;
            };
            if !meta.is_dir() {
                writeln!(stdout, "{}", display_name(&target, path))?;
                continue;
            }

            let mut entries = Vec::new();
            for entry in fs::read_dir(&target)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !show_hidden && name.starts_with('.') {
                    continue;
                }
                // Follow symlinks like `ls` does, but keep dangling ones listed.
                let meta = match fs::metadata(entry.path()) {
                    Ok(m) => m,
                    Err(_) => entry.metadata()?,
                };
                entries.push((name, meta));
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            if long_format {
                for (name, meta) in &entries {
                    writeln!(stdout, "{}", Self::long_line(name, meta)?)?;
                }
            } else if !entries.is_empty() {
                let names: Vec<String> = entries
                    .iter()
                    .map(|(name, meta)| if meta.is_dir() { format!("{}/", name) } else { name.clone() })
                    .collect();
                writeln!(stdout, "{}", names.join("  "))?;
            }
        }
        Ok(())
    }
}

/// Print files to stdout.
pub struct Cat;

impl BuiltinCommand for Cat {
    fn name(&self) -> &'static str {
        "cat"
    }

    fn execute(&self, args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        if args.is_empty() {
            return Err(CommandError::Usage("missing file operand"));
        }
        for path in args {
            let file = env.resolve(path);
            if !file.is_file() {
                writeln!(stdout, "cat: {}: No such file or directory", path)?;
                continue;
            }
            stdout.write_all(&fs::read(&file)?)?;
        }
        Ok(())
    }
}

/// Write the arguments separated by spaces, followed by a newline.
pub struct Echo;

impl BuiltinCommand for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn execute(&self, args: &[String], stdout: &mut dyn Write, _env: &mut Environment) -> Result {
        writeln!(stdout, "{}", args.join(" "))?;
        Ok(())
    }
}

#[derive(FromArgs)]
/// create directories
#[argh(help_triggers("--help"))]
pub struct Mkdir {
    #[argh(switch, short = 'p')]
    /// make parent directories as needed; an existing directory is not an error
    pub parents: bool,

    #[argh(positional)]
    /// directories to create
    pub dirs: Vec<String>,
}

impl ParsedCommand for Mkdir {
    const NAME: &'static str = "mkdir";

    fn run(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result {
        if self.dirs.is_empty() {
            return Err(CommandError::Usage("missing operand"));
        }
        for path in &self.dirs {
            let dir = env.resolve(path);
            let created = if self.parents { fs::create_dir_all(&dir) } else { fs::create_dir(&dir) };
            if created.is_err() {
                return Err(CommandError::Failed(format!("cannot create directory '{}'", path)));
            }
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// remove files or directories
#[argh(help_triggers("--help"))]
pub struct Rm {
    #[argh(switch, short = 'r')]
    /// remove directories and their contents recursively
    pub recursive: bool,

    #[argh(switch, short = 'f')]
    /// ignore nonexistent files, never complain about missing operands
    pub force: bool,

    #[argh(positional)]
    /// paths to remove
    pub paths: Vec<String>,
}

impl ParsedCommand for Rm {
    const NAME: &'static str = "rm";

    fn run(self, _stdout: &mut dyn Write, env: &mut Environment) -> Result {
        if self.paths.is_empty() && !self.force {
            return Err(CommandError::Usage("missing operand"));
        }

        for path in &self.paths {
            let target = env.resolve(path);
            let Ok(meta) = fs::symlink_metadata(&target) else {
                if self.force {
                    continue;
                }
                return Err(CommandError::Failed(format!(
                    "cannot remove '{}': No such file or directory",
                    path
                )));
            };
            if meta.is_dir() {
                if !self.recursive {
                    return Err(CommandError::Failed(format!(
                        "cannot remove '{}': Is a directory",
                        path
                    )));
                }
                fs::remove_dir_all(&target)?;
            } else {
                fs::remove_file(&target)?;
            }
        }
        Ok(())
    }
}

/// Create empty files or bump their modification time.
pub struct Touch;

impl BuiltinCommand for Touch {
    fn name(&self) -> &'static str {
        "touch"
    }

    fn execute(&self, args: &[String], _stdout: &mut dyn Write, env: &mut Environment) -> Result {
        if args.is_empty() {
            return Err(CommandError::Usage("missing file operand"));
        }
        for path in args {
            let target = env.resolve(path);
            if target.is_dir() {
                fs::File::open(&target)?.set_modified(SystemTime::now())?;
            } else if target.exists() {
                fs::OpenOptions::new()
                    .append(true)
                    .open(&target)?
                    .set_modified(SystemTime::now())?;
            } else {
                fs::File::create(&target)?;
            }
        }
        Ok(())
    }
}

/// Emit the terminal clear sequence.
pub struct Clear;

impl BuiltinCommand for Clear {
    fn name(&self) -> &'static str {
        "clear"
    }

    fn execute(&self, _args: &[String], stdout: &mut dyn Write, _env: &mut Environment) -> Result {
        stdout.write_all(CLEAR_SCREEN.as_bytes())?;
        Ok(())
    }
}

pub struct Help;

impl BuiltinCommand for Help {
    fn name(&self) -> &'static str {
        "help"
    }

    fn execute(&self, _args: &[String], stdout: &mut dyn Write, _env: &mut Environment) -> Result {
        stdout.write_all(HELP.as_bytes())?;
        Ok(())
    }
}

/// Print every variable as `KEY=VALUE`, sorted by key.
pub struct Env;

impl BuiltinCommand for Env {
    fn name(&self) -> &'static str {
        "env"
    }

    fn execute(&self, _args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        for (key, value) in env.snapshot() {
            writeln!(stdout, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Set variables from `KEY=VALUE` arguments. Arguments without `=` are ignored.
pub struct Export;

impl BuiltinCommand for Export {
    fn name(&self) -> &'static str {
        "export"
    }

    fn execute(&self, args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        if args.is_empty() {
            return Env.execute(args, stdout, env);
        }
        for arg in args {
            if let Some((key, value)) = arg.split_once('=') {
                env.set_var(key, value);
            }
        }
        Ok(())
    }
}

pub struct Date;

impl BuiltinCommand for Date {
    fn name(&self) -> &'static str {
        "date"
    }

    fn execute(&self, _args: &[String], stdout: &mut dyn Write, _env: &mut Environment) -> Result {
        writeln!(stdout, "{}", Local::now().format("%a %b %d %H:%M:%S %Z %Y"))?;
        Ok(())
    }
}

pub struct Whoami;

impl BuiltinCommand for Whoami {
    fn name(&self) -> &'static str {
        "whoami"
    }

    fn execute(&self, _args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        writeln!(stdout, "{}", env.get_var("USER").unwrap_or(DEFAULT_USER))?;
        Ok(())
    }
}

#[derive(FromArgs)]
/// print system information
#[argh(help_triggers("--help"))]
pub struct Uname {
    #[argh(switch, short = 'a')]
    /// also print kernel release, host name and machine architecture
    pub all: bool,
}

impl Uname {
    fn os_name() -> &'static str {
        match std::env::consts::OS {
            "android" => "Android",
            "linux" => "Linux",
            "macos" => "Darwin",
            "windows" => "Windows",
            other => other,
        }
    }

    fn proc_value(path: &str) -> String {
        fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

impl ParsedCommand for Uname {
    const NAME: &'static str = "uname";

    fn run(self, stdout: &mut dyn Write, _env: &mut Environment) -> Result {
        if self.all {
            writeln!(
                stdout,
                "{} {} {} {}",
                Self::os_name(),
                Self::proc_value("/proc/sys/kernel/osrelease"),
                Self::proc_value("/proc/sys/kernel/hostname"),
                std::env::consts::ARCH
            )?;
        } else {
            writeln!(stdout, "{}", Self::os_name())?;
        }
        Ok(())
    }
}

/// Resolve `<src> <dst>` for `cp` and `mv`. A destination that is an existing
/// directory receives the source under its own name. Both ending up at the same
/// file is an error, since copying a file onto itself truncates it.
fn source_and_destination(args: &[String], env: &Environment) -> Result<(PathBuf, PathBuf)> {
    if args.len() < 2 {
        return Err(CommandError::Usage("missing file operand"));
    }
    let src = env.resolve(&args[0]);
    if fs::symlink_metadata(&src).is_err() {
        return Err(CommandError::Failed(format!(
            "cannot stat '{}': No such file or directory",
            args[0]
        )));
    }
    let mut dst = env.resolve(&args[1]);
    if dst.is_dir() {
        if let Some(name) = src.file_name() {
            dst.push(name);
        }
    }
    if let (Ok(a), Ok(b)) = (fs::canonicalize(&src), fs::canonicalize(&dst)) {
        if a == b {
            return Err(CommandError::Failed(format!(
                "'{}' and '{}' are the same file",
                args[0], args[1]
            )));
        }
    }
    Ok((src, dst))
}

/// Copy a file, overwriting the destination.
pub struct Cp;

impl BuiltinCommand for Cp {
    fn name(&self) -> &'static str {
        "cp"
    }

    fn execute(&self, args: &[String], _stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let (src, dst) = source_and_destination(args, env)?;
        if src.is_dir() {
            return Err(CommandError::Failed(format!(
                "-r not specified; omitting directory '{}'",
                args[0]
            )));
        }
        fs::copy(&src, &dst)?;
        Ok(())
    }
}

/// Rename or move a file or directory.
pub struct Mv;

impl BuiltinCommand for Mv {
    fn name(&self) -> &'static str {
        "mv"
    }

    fn execute(&self, args: &[String], _stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let (src, dst) = source_and_destination(args, env)?;
        fs::rename(&src, &dst)?;
        Ok(())
    }
}

/// Print every path below a starting point, parents before children.
pub struct Find;

impl Find {
    fn walk(path: &Path, stdout: &mut dyn Write) -> Result {
        writeln!(stdout, "{}", path.display())?;
        let is_dir = fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return Ok(());
        }
        // Unreadable directories are listed but not descended into.
        let Ok(entries) = fs::read_dir(path) else {
            return Ok(());
        };
        let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        children.sort();
        for child in children {
            Self::walk(&child, stdout)?;
        }
        Ok(())
    }
}

impl BuiltinCommand for Find {
    fn name(&self) -> &'static str {
        "find"
    }

    fn execute(&self, args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let start = args.first().map(String::as_str).unwrap_or(".");
        let root = env.resolve(start);
        if !root.exists() {
            return Err(CommandError::Failed(format!(
                "'{}': No such file or directory",
                start
            )));
        }
        Self::walk(&root, stdout)
    }
}

#[derive(FromArgs)]
/// print lines containing a literal pattern
#[argh(help_triggers("--help"))]
pub struct Grep {
    #[argh(switch, short = 'i')]
    /// ignore case distinctions
    pub ignore_case: bool,

    #[argh(positional)]
    /// the pattern, matched literally, followed by the files to search
    pub operands: Vec<String>,
}

impl ParsedCommand for Grep {
    const NAME: &'static str = "grep";

    fn run(self, stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let [pattern, files @ ..] = self.operands.as_slice() else {
            return Err(CommandError::Usage("missing pattern or file"));
        };
        if files.is_empty() {
            return Err(CommandError::Usage("missing pattern or file"));
        }

        let re = RegexBuilder::new(&regex::escape(pattern))
            .case_insensitive(self.ignore_case)
            .build()
            .map_err(|e| CommandError::Failed(e.to_string()))?;

        for name in files {
            let file = env.resolve(name);
            if !file.is_file() {
                continue;
            }
            for line in read_text(&file)?.lines() {
                if re.is_match(line) {
                    writeln!(stdout, "{}", line)?;
                }
            }
        }
        Ok(())
    }
}

/// `-n COUNT` for `head` and `tail`; anything but a number means the default.
fn line_count(lines: Option<&str>) -> usize {
    lines.and_then(|n| n.parse().ok()).unwrap_or(DEFAULT_LINES)
}

fn first_file(files: &[String]) -> Result<&str> {
    files
        .first()
        .map(String::as_str)
        .ok_or(CommandError::Usage("missing file operand"))
}

fn read_lines_of(name: &str, env: &Environment) -> Result<String> {
    let file = env.resolve(name);
    if !file.is_file() {
        return Err(CommandError::Failed(format!("cannot open '{}'", name)));
    }
    read_text(&file)
}

#[derive(FromArgs)]
/// print the first lines of a file
#[argh(help_triggers("--help"))]
pub struct Head {
    #[argh(option, short = 'n')]
    /// number of lines; anything that is not a number means 10
    pub lines: Option<String>,

    #[argh(positional)]
    /// the file to read
    pub files: Vec<String>,
}

impl ParsedCommand for Head {
    const NAME: &'static str = "head";

    fn run(self, stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let count = line_count(self.lines.as_deref());
        let name = first_file(&self.files)?;
        for line in read_lines_of(name, env)?.lines().take(count) {
            writeln!(stdout, "{}", line)?;
        }
        Ok(())
    }
}

#[derive(FromArgs)]
/// print the last lines of a file
#[argh(help_triggers("--help"))]
pub struct Tail {
    #[argh(option, short = 'n')]
    /// number of lines; anything that is not a number means 10
    pub lines: Option<String>,

    #[argh(positional)]
    /// the file to read
    pub files: Vec<String>,
}

impl ParsedCommand for Tail {
    const NAME: &'static str = "tail";

    fn run(self, stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let count = line_count(self.lines.as_deref());
        let name = first_file(&self.files)?;
        let text = read_lines_of(name, env)?;
        let lines: Vec<&str> = text.lines().collect();
        for line in &lines[lines.len().saturating_sub(count)..] {
            writeln!(stdout, "{}", line)?;
        }
        Ok(())
    }
}

/// Count lines, words and bytes of a file.
pub struct Wc;

impl BuiltinCommand for Wc {
    fn name(&self) -> &'static str {
        "wc"
    }

    fn execute(&self, args: &[String], stdout: &mut dyn Write, env: &mut Environment) -> Result {
        let Some(name) = args.first() else {
            return Err(CommandError::Usage("missing file operand"));
        };
        let file = env.resolve(name);
        if !file.is_file() {
            return Err(CommandError::Failed(format!(
                "{}: No such file or directory",
                name
            )));
        }
        let bytes = fs::read(&file)?;
        let text = String::from_utf8_lossy(&bytes);
        let lines = text.lines().count();
        let words = text.split_whitespace().count();
        writeln!(stdout, "{} {} {} {}", lines, words, bytes.len(), name)?;
        Ok(())
    }
}

/// Every built-in, in the order `help` lists them.
pub fn all() -> Vec<Box<dyn BuiltinCommand>> {
    vec![
        Box::new(Cd),
        Box::new(Pwd),
        Box::new(Parsed::<Ls>::new()),
        Box::new(Cat),
        Box::new(Echo),
        Box::new(Parsed::<Mkdir>::new()),
        Box::new(Parsed::<Rm>::new()),
        Box::new(Touch),
        Box::new(Cp),
        Box::new(Mv),
        Box::new(Find),
        Box::new(Parsed::<Grep>::new()),
        Box::new(Parsed::<Head>::new()),
        Box::new(Parsed::<Tail>::new()),
        Box::new(Wc),
        Box::new(Env),
        Box::new(Export),
        Box::new(Date),
        Box::new(Whoami),
        Box::new(Parsed::<Uname>::new()),
        Box::new(Clear),
        Box::new(Help),
    ]
}
