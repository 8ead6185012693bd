//! Test doubles for external tools and log sinks

use crate::executors::{CommandRunner, EventStream};
use crate::sink::LogSink;
use crate::{Error, Result};
use async_trait::async_trait;
use command_executor::{Command, ExitStatus, LogSource, ProcessEvent, ProcessHandle};
use futures::StreamExt;
use service_store::{LogEntry, LogLevel};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted result of a command
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The command runs and exits
    Exit {
        /// Exit code
        code: i32,
        /// Standard output
        stdout: String,
        /// Standard error
        stderr: String,
    },
    /// The command cannot be started
    SpawnFailure(String),
}

struct Rule {
    prefix: String,
    outcome: Outcome,
    times: Option<usize>,
}

/// A [`CommandRunner`] that records every command and answers from a script
///
/// Rules match when the space-joined argv starts with their prefix. Later
/// rules take precedence; unmatched commands exit 0 with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Command>>,
    yields: bool,
}

impl ScriptedRunner {
    /// Runner where every command succeeds silently
    pub fn new() -> Self {
        Self::default()
    }

    /// Yield to other tasks before answering each command, the way a real
    /// process would
    pub fn yielding(mut self) -> Self {
        self.yields = true;
        self
    }

    fn push(&self, prefix: &str, outcome: Outcome, times: Option<usize>) -> &Self {
        lock(&self.rules).push(Rule {
            prefix: prefix.to_string(),
            outcome,
            times,
        });
        self
    }

    /// Matching commands exit with `code` and print `stdout`/`stderr`
    pub fn on(&self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> &Self {
        let outcome = Outcome::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };
        self.push(prefix, outcome, None)
    }

    /// Like [`on`](Self::on), for the next `times` matching commands only
    pub fn on_times(&self, prefix: &str, times: usize, code: i32, stdout: &str, stderr: &str) -> &Self {
        let outcome = Outcome::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };
        self.push(prefix, outcome, Some(times))
    }

    /// Matching commands succeed with `stdout`
    pub fn ok(&self, prefix: &str, stdout: &str) -> &Self {
        self.on(prefix, 0, stdout, "")
    }

    /// Matching commands exit 1 with `stderr`
    pub fn fail(&self, prefix: &str, stderr: &str) -> &Self {
        self.on(prefix, 1, "", stderr)
    }

    /// Matching commands cannot be spawned
    pub fn spawn_failure(&self, prefix: &str, reason: &str) -> &Self {
        self.push(prefix, Outcome::SpawnFailure(reason.to_string()), None)
    }

    /// Every command run so far, as argv
    pub fn calls(&self) -> Vec<Vec<String>> {
        lock(&self.calls).iter().map(Command::argv).collect()
    }

    /// Every command run so far
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.calls).clone()
    }

    /// Commands whose space-joined argv starts with `prefix`
    pub fn calls_matching(&self, prefix: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| argv.join(" ").starts_with(prefix))
            .collect()
    }

    /// Index of the first command starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|argv| argv.join(" ").starts_with(prefix))
    }

    fn outcome_for(&self, rendered: &str) -> Outcome {
        let mut rules = lock(&self.rules);
        let found = rules.iter_mut().rev().find(|rule| {
            rendered.starts_with(&rule.prefix) && rule.times.is_none_or(|n| n > 0)
        });
        match found {
            Some(rule) => {
                if let Some(n) = rule.times.as_mut() {
                    *n -= 1;
                }
                rule.outcome.clone()
            }
            None => Outcome::Exit {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
            },
        }
    }
}

struct ScriptedHandle {
    code: i32,
}

#[async_trait]
impl ProcessHandle for ScriptedHandle {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> command_executor::Result<ExitStatus> {
        Ok(ExitStatus::from_code(self.code))
    }

    async fn terminate(&mut self) -> command_executor::Result<()> {
        Ok(())
    }

    async fn kill(&mut self) -> command_executor::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn spawn(&self, command: Command) -> Result<(EventStream, Box<dyn ProcessHandle>)> {
        let rendered = command.argv().join(" ");
        lock(&self.calls).push(command);
        if self.yields {
            smol::future::yield_now().await;
        }

        match self.outcome_for(&rendered) {
            Outcome::SpawnFailure(reason) => Err(Error::CommandExecutor(
                command_executor::Error::spawn_failed(rendered, reason),
            )),
            Outcome::Exit { code, stdout, stderr } => {
                let events: Vec<ProcessEvent> = stdout
                    .lines()
                    .map(|l| ProcessEvent::line(LogSource::Stdout, l))
                    .chain(stderr.lines().map(|l| ProcessEvent::line(LogSource::Stderr, l)))
                    .collect();
                let handle: Box<dyn ProcessHandle> = Box::new(ScriptedHandle { code });
                Ok((futures::stream::iter(events).boxed(), handle))
            }
        }
    }
}

/// Collects emitted log entries
#[derive(Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far
    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).clone()
    }

    /// Messages of entries at `level`
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Whether any message contains `text`
    pub fn contains(&self, text: &str) -> bool {
        lock(&self.entries).iter().any(|e| e.message.contains(text))
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn emit(&self, entry: LogEntry) {
        lock(&self.entries).push(entry);
    }
}
