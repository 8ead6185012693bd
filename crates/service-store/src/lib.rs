//! Persistent service records and live service logs
//!
//! A [`ServiceStore`] keeps one [`ServiceRecord`] per provisioned service
//! plus an append-only log keyed by `(service_id, sequence)`. The
//! [`LogBroadcastHub`] sits in front of the log: it persists each entry and
//! fans it out to live subscribers, and replays history to new subscribers
//! before they see live entries.
//!
//! Storage is pluggable through [`StoreBackend`]; sled and in-memory
//! backends are provided.

#![warn(missing_docs)]

pub mod backend;
pub mod broadcast;
pub mod error;
pub mod models;
pub mod store;

pub use backend::{StoreBackend, memory::MemoryBackend, sled::SledBackend};
pub use broadcast::{LogBroadcastHub, Subscription};
pub use error::{Error, Result};
pub use models::*;
pub use store::ServiceStore;
