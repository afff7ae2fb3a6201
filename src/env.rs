use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// User name reported when `USER` is not set.
pub const DEFAULT_USER: &str = "android";
/// Shell advertised through `SHELL`.
pub const DEFAULT_SHELL: &str = "/system/bin/sh";
/// Terminal type advertised through `TERM`.
pub const DEFAULT_TERM: &str = "xterm-256color";
/// Search path advertised through `PATH`.
pub const DEFAULT_PATH: &str = "/system/bin:/system/xbin";
/// Host name shown in the prompt unless the session picks another one.
pub const DEFAULT_SESSION_NAME: &str = "shell";

/// Variables forwarded to a spawned shell, in this order.
const CHILD_VARS: [(&str, &str); 4] = [
    ("HOME", ""),
    ("PATH", DEFAULT_PATH),
    ("TERM", DEFAULT_TERM),
    ("USER", DEFAULT_USER),
];

/// Per-session view of the working directory and variables seen by built-ins.
///
/// The environment is detached from the process it lives in: it never reads
/// process variables and never changes the process-wide current directory, so
/// several sessions can coexist in one process.
///
/// `cwd` is always absolute and, once the directory exists, canonical. Whenever either `cwd` or `PWD`
/// changes through [`Environment::set_var`], the other one follows; after a
/// direct [`Environment::set_cwd`] the owner calls [`Environment::sync_pwd`].
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, String>,
    cwd: PathBuf,
    session_name: String,
}

impl Environment {
    /// Create the environment of a new session rooted at `home`.
    ///
    /// `home` becomes both `HOME` and the initial working directory. It is
    /// canonicalized when possible so that the prompt can recognise it again
    /// after a `cd`; a home that does not exist yet is made absolute against the
    /// process's current directory.
    pub fn new(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref();
        let cwd: PathBuf = fs::canonicalize(home)
            .or_else(|_| std::path::absolute(home))
            .map(|path| path.components().collect())
            .unwrap_or_else(|_| PathBuf::from("/"));
        let home_str = cwd.to_string_lossy().into_owned();

        let mut vars = HashMap::new();
        vars.insert("HOME".to_string(), home_str.clone());
        vars.insert("USER".to_string(), DEFAULT_USER.to_string());
        vars.insert("SHELL".to_string(), DEFAULT_SHELL.to_string());
        vars.insert("TERM".to_string(), DEFAULT_TERM.to_string());
        vars.insert("PATH".to_string(), DEFAULT_PATH.to_string());
        vars.insert("PWD".to_string(), home_str);

        Self {
            vars,
            cwd,
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }

    /// Use `name` as the host part of the prompt.
    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }

    /// The current working directory, always canonical.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override a variable.
    ///
    /// Assigning `PWD` moves the working directory to the canonical form of the
    /// new value; if that path cannot be resolved the directory stays where it
    /// was and `PWD` keeps describing it.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        let key = key.into();
        let val = val.into();
        if key == "PWD" {
            self.set_cwd(&val);
            self.sync_pwd();
        } else {
            self.vars.insert(key, val);
        }
    }

    /// Move to `path`, resolved against the current directory.
    ///
    /// Returns `false` and leaves the directory untouched when the path cannot be
    /// canonicalized. Callers check that the target is a directory beforehand.
    pub fn set_cwd(&mut self, path: impl AsRef<Path>) -> bool {
        match fs::canonicalize(self.cwd.join(path)) {
            Ok(canonical) => {
                self.cwd = canonical;
                true
            }
            Err(_) => false,
        }
    }

    /// Copy the working directory into `PWD`.
    pub fn sync_pwd(&mut self) {
        let pwd = self.cwd.to_string_lossy().into_owned();
        self.vars.insert("PWD".to_string(), pwd);
    }

    /// Sorted copy of every variable.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Resolve a command argument to a path: absolute arguments are used as they
    /// are, relative ones are joined to the working directory. `.` segments are
    /// dropped, `..` segments are left for the filesystem to interpret.
    pub fn resolve(&self, arg: &str) -> PathBuf {
        self.cwd.join(arg).components().collect()
    }

    /// The prompt, e.g. `android@shell:~/projects$ `.
    pub fn prompt(&self) -> String {
        let user = self.get_var("USER").unwrap_or(DEFAULT_USER);
        format!("{}@{}:{}$ ", user, self.session_name, self.display_path())
    }

    /// The working directory with a leading `HOME` shown as `~`.
    fn display_path(&self) -> String {
        let home = match self.get_var("HOME") {
            Some(home) if !home.is_empty() => home,
            _ => return self.cwd.display().to_string(),
        };
        match self.cwd.strip_prefix(home) {
            Ok(rest) if rest.as_os_str().is_empty() => "~".to_string(),
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => self.cwd.display().to_string(),
        }
    }

    /// `KEY=VALUE` entries handed to a spawned shell.
    pub fn child_environment(&self) -> Vec<String> {
        CHILD_VARS
            .iter()
            .map(|&(key, fallback)| format!("{}={}", key, self.get_var(key).unwrap_or(fallback)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Environment) {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = Environment::new(dir.path());
        (dir, env)
    }

    #[test]
    fn seeds_default_variables() {
        let (dir, env) = setup();
        let home = fs::canonicalize(dir.path()).unwrap();

        assert_eq!(env.get_var("HOME"), Some(home.to_str().unwrap()));
        assert_eq!(env.get_var("PWD"), Some(home.to_str().unwrap()));
        assert_eq!(env.get_var("USER"), Some(DEFAULT_USER));
        assert_eq!(env.get_var("SHELL"), Some(DEFAULT_SHELL));
        assert_eq!(env.get_var("TERM"), Some(DEFAULT_TERM));
        assert_eq!(env.get_var("PATH"), Some(DEFAULT_PATH));
        assert_eq!(env.cwd(), home.as_path());
    }

    #[test]
    fn missing_relative_home_becomes_absolute() {
        let env = Environment::new("not/created/yet");
        let cwd = env.cwd();

        assert!(cwd.is_absolute(), "{}", cwd.display());
        assert!(cwd.ends_with("not/created/yet"));
        assert_eq!(env.get_var("HOME"), cwd.to_str());
        assert_eq!(env.get_var("PWD"), cwd.to_str());
        assert_eq!(env.prompt(), "android@shell:~$ ");
    }

    #[test]
    fn empty_home_falls_back_to_root() {
        let env = Environment::new("");
        assert_eq!(env.cwd(), Path::new("/"));
    }

    #[test]
    fn set_and_get_var() {
        let (_dir, mut env) = setup();
        assert_eq!(env.get_var("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set_var("KEY", "VALUE");
        assert_eq!(env.get_var("KEY"), Some("VALUE"));

        env.set_var("KEY", "OTHER");
        assert_eq!(env.get_var("KEY"), Some("OTHER"));
    }

    #[test]
    fn set_cwd_stores_canonical_path() {
        let (dir, mut env) = setup();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();

        assert!(env.set_cwd("a/./b/.."));
        assert_eq!(env.cwd(), fs::canonicalize(dir.path().join("a")).unwrap());
    }

    #[test]
    fn set_cwd_failure_leaves_directory_alone() {
        let (_dir, mut env) = setup();
        let before = env.cwd().to_path_buf();

        assert!(!env.set_cwd("does/not/exist"));
        assert_eq!(env.cwd(), before.as_path());
    }

    #[test]
    fn assigning_pwd_moves_cwd() {
        let (dir, mut env) = setup();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let canonical = fs::canonicalize(&sub).unwrap();

        env.set_var("PWD", sub.join("..").join("sub").to_string_lossy());
        assert_eq!(env.cwd(), canonical.as_path());
        assert_eq!(env.get_var("PWD"), Some(canonical.to_str().unwrap()));
    }

    #[test]
    fn assigning_bogus_pwd_keeps_both_in_sync() {
        let (_dir, mut env) = setup();
        let before = env.cwd().to_path_buf();

        env.set_var("PWD", "/definitely/not/here");
        assert_eq!(env.cwd(), before.as_path());
        assert_eq!(env.get_var("PWD"), Some(before.to_str().unwrap()));
    }

    #[test]
    fn sync_pwd_copies_cwd() {
        let (dir, mut env) = setup();
        fs::create_dir(dir.path().join("x")).unwrap();
        env.set_cwd("x");
        assert_ne!(env.get_var("PWD"), env.cwd().to_str());

        env.sync_pwd();
        assert_eq!(env.get_var("PWD"), env.cwd().to_str());
    }

    #[test]
    fn prompt_abbreviates_home() {
        let (dir, env) = setup();
        fs::create_dir(dir.path().join("projects")).unwrap();
        let mut env = env.with_session_name("box");

        assert_eq!(env.prompt(), "android@box:~$ ");
        env.set_cwd("projects");
        assert_eq!(env.prompt(), "android@box:~/projects$ ");
    }

    #[test]
    fn prompt_outside_home_shows_full_path() {
        let (dir, mut env) = setup();
        let parent = fs::canonicalize(dir.path().join("..")).unwrap();
        env.set_cwd("..");

        assert_eq!(
            env.prompt(),
            format!("android@{}:{}$ ", DEFAULT_SESSION_NAME, parent.display())
        );
    }

    #[test]
    fn prompt_does_not_abbreviate_sibling_with_common_prefix() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join("home")).unwrap();
        fs::create_dir(base.path().join("homework")).unwrap();
        let mut env = Environment::new(base.path().join("home"));

        env.set_cwd("../homework");
        assert!(env.prompt().ends_with("homework$ "));
        assert!(!env.prompt().contains('~'));
    }

    #[test]
    fn prompt_uses_user_variable() {
        let (_dir, mut env) = setup();
        env.set_var("USER", "alice");
        assert!(env.prompt().starts_with("alice@"));
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let (_dir, env) = setup();
        assert_eq!(env.resolve("/etc/./hosts"), PathBuf::from("/etc/hosts"));
        assert_eq!(env.resolve("a/./b"), env.cwd().join("a").join("b"));
        assert_eq!(env.resolve("."), env.cwd().to_path_buf());
    }

    #[test]
    fn snapshot_is_sorted_copy() {
        let (_dir, mut env) = setup();
        env.set_var("AAA", "1");
        let snap = env.snapshot();
        assert_eq!(snap.keys().next().map(String::as_str), Some("AAA"));
        assert_eq!(snap.get("AAA").map(String::as_str), Some("1"));
    }

    #[test]
    fn child_environment_follows_model() {
        let (_dir, mut env) = setup();
        env.set_var("USER", "bob");
        let child = env.child_environment();

        assert_eq!(child.len(), 4);
        assert!(child[0].starts_with("HOME=/"));
        assert_eq!(child[1], format!("PATH={}", DEFAULT_PATH));
        assert_eq!(child[2], format!("TERM={}", DEFAULT_TERM));
        assert_eq!(child[3], "USER=bob");
    }
}
