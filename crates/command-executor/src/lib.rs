//! Runtime-agnostic local command execution
//!
//! Commands are described as argument vectors and never pass through a
//! shell. A [`Launcher`] spawns them and hands back a merged stream of
//! stdout/stderr lines together with a [`ProcessHandle`] used to wait for
//! or stop the child.

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod event;
pub mod executor;
pub mod launcher;
pub mod process;

pub use backends::local::LocalLauncher;
pub use command::{Command, CommandBuilder};
pub use error::{Error, Result};
pub use event::{LogSource, ProcessEvent, ProcessEventType};
pub use executor::Executor;
pub use launcher::Launcher;
pub use process::{ExitResult, ExitStatus, ProcessHandle};
