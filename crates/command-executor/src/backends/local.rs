//! Local process launcher

use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures::stream::Stream;
use futures_lite::io::{AsyncBufReadExt, BufReader, Lines};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{LogSource, ProcessEvent, ProcessEventType};
use crate::executor::Executor;
use crate::launcher::Launcher;
use crate::process::{ExitStatus, ProcessHandle};

/// Launcher for executing processes on this host
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// A handle to control a local process
///
/// The child is killed when the handle is dropped before it was reaped.
pub struct LocalProcessHandle {
    child: Child,
    reaped: bool,
}

/// Merged stream of stdout and stderr lines
///
/// Both pipes are polled on every wake so a chatty stderr can never block a
/// child that is waiting for its stdout to drain (and vice versa).
pub struct ProcessEventStream {
    stdout: Option<Lines<BufReader<async_process::ChildStdout>>>,
    stderr: Option<Lines<BufReader<async_process::ChildStderr>>>,
    started_sent: bool,
    child_id: u32,
}

#[async_trait]
impl Launcher for LocalLauncher {
    type EventStream = ProcessEventStream;
    type Handle = LocalProcessHandle;

    async fn launch(&self, command: Command) -> Result<(Self::EventStream, Self::Handle)> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut async_cmd = command.prepare();
        async_cmd.stdin(Stdio::null());
        async_cmd.stdout(Stdio::piped());
        async_cmd.stderr(Stdio::piped());

        let mut child = async_cmd
            .spawn()
            .map_err(|e| Error::from_spawn(program, e))?;

        let child_id = child.id();
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        let events = ProcessEventStream {
            stdout,
            stderr,
            started_sent: false,
            child_id,
        };
        let handle = LocalProcessHandle {
            child,
            reaped: false,
        };

        Ok((events, handle))
    }
}

impl Executor<LocalLauncher> {
    /// Create an executor that runs commands on this host
    pub fn local(name: impl Into<String>) -> Self {
        Executor::new(name, LocalLauncher)
    }
}

impl LocalProcessHandle {
    #[cfg(unix)]
    fn signal(&self, sig: nix::sys::signal::Signal) -> Result<()> {
        use nix::sys::signal;
        use nix::unistd::Pid;

        let pid = Pid::from_raw(self.child.id() as i32);
        signal::kill(pid, sig).map_err(|e| Error::signal_failed(sig as i32, e.to_string()))
    }
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.status().await.map_err(|e| Error::WaitFailed {
            pid: self.child.id(),
            reason: e.to_string(),
        })?;
        self.reaped = true;

        Ok(ExitStatus {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        })
    }

    async fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal(nix::sys::signal::Signal::SIGTERM)
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))
        }
    }

    async fn kill(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            self.signal(nix::sys::signal::Signal::SIGKILL)
        }

        #[cfg(not(unix))]
        {
            self.child
                .kill()
                .map_err(|e| Error::signal_failed(-1, e.to_string()))
        }
    }
}

impl Drop for LocalProcessHandle {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
        }
    }
}

impl ProcessEventStream {
    fn poll_pipe<R>(
        pipe: &mut Option<Lines<BufReader<R>>>,
        source: LogSource,
        cx: &mut Context<'_>,
    ) -> Option<ProcessEvent>
    where
        R: futures_lite::io::AsyncRead + Unpin,
    {
        let lines = pipe.as_mut()?;
        match Pin::new(lines).poll_next(cx) {
            Poll::Ready(Some(Ok(line))) => Some(ProcessEvent::line(source, line)),
            // A read error ends that pipe, same as EOF
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                *pipe = None;
                None
            }
            Poll::Pending => None,
        }
    }
}

impl Stream for ProcessEventStream {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if !this.started_sent {
            this.started_sent = true;
            let event = ProcessEvent::new(ProcessEventType::Started { pid: this.child_id });
            return Poll::Ready(Some(event));
        }

        if let Some(event) = Self::poll_pipe(&mut this.stdout, LogSource::Stdout, cx) {
            return Poll::Ready(Some(event));
        }
        if let Some(event) = Self::poll_pipe(&mut this.stderr, LogSource::Stderr, cx) {
            return Poll::Ready(Some(event));
        }

        if this.stdout.is_none() && this.stderr.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}
