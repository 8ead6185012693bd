//! Launcher implementations

pub mod local;
pub use local::{LocalLauncher, LocalProcessHandle, ProcessEventStream};
