//! Argument-vector command descriptions

use async_process::Command as AsyncCommand;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

/// A command to be executed
///
/// Every argument is passed to the program verbatim. Nothing is ever handed
/// to a shell, so values derived from user input cannot change the shape of
/// the invocation. The type is `Clone` so the same command can be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: OsString,
    args: Vec<OsString>,
    /// Overlay applied on top of the inherited environment
    env: BTreeMap<OsString, OsString>,
    current_dir: Option<PathBuf>,
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Set an environment variable in the overlay
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_owned(), val.as_ref().to_owned());
        self
    }

    /// Set multiple environment variables in the overlay
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, val) in vars {
            self.env(key, val);
        }
        self
    }

    /// Set the working directory for the command
    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Get the arguments
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Get the environment overlay
    pub fn get_envs(&self) -> &BTreeMap<OsString, OsString> {
        &self.env
    }

    /// Get the current directory
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Program name followed by its arguments, lossily converted to UTF-8
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    /// Prepare this command for execution by converting to an `async_process::Command`
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(&self.args);
        for (key, val) in &self.env {
            cmd.env(key, val);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for Command {
    /// Renders the argv for log lines; arguments with whitespace or quotes
    /// are single-quoted so the line stays readable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.argv().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if part.is_empty() || part.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
                write!(f, "'{}'", part.replace('\'', "'\\''"))?;
            } else {
                f.write_str(part)?;
            }
        }
        Ok(())
    }
}

impl Command {
    /// Create a builder for this command (for chaining)
    pub fn builder<S: AsRef<OsStr>>(program: S) -> CommandBuilder {
        CommandBuilder(Command::new(program))
    }
}

/// Builder wrapper for by-value command construction
#[derive(Debug, Clone)]
pub struct CommandBuilder(Command);

impl CommandBuilder {
    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.0.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.0.args(args);
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.0.env(key, val);
        self
    }

    /// Apply an optional environment variable
    pub fn env_opt<K, V>(mut self, key: K, val: Option<V>) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        if let Some(val) = val {
            self.0.env(key, val);
        }
        self
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.0.current_dir(dir);
        self
    }

    /// Build the command
    pub fn build(self) -> Command {
        self.0
    }
}
