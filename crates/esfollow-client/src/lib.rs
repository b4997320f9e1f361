//! es-follow search backend protocol and clients
//!
//! This crate provides the wire protocol of Elasticsearch-style search
//! backends, the [`QueryBackend`] capability the follow engine consumes,
//! a blocking HTTP implementation and an in-memory implementation.

mod backend;
mod client;
mod error;
mod memory;
mod protocol;
mod timestamp;

pub use backend::QueryBackend;
pub use client::{Auth, HttpBackend, HttpBackendBuilder, DEFAULT_BASE_URL};
pub use error::BackendError;
pub use memory::{CallCounts, MemoryBackend};
pub use protocol::*;
pub use timestamp::{RawTimestamp, TimestampError};
