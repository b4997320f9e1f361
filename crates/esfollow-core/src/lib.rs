//! es-follow Core Components
//!
//! This crate provides incremental following of time-ordered documents in a
//! search backend: the delivered-id tracker, the scroll page walker, the
//! follow engine with its poll loop, and one-shot search with context.

mod config;
mod error;
mod fetch;
mod follow;
mod poller;
mod processor;
mod stats;
mod tracker;
mod walker;

pub use config::FollowConfig;
pub use error::{FollowError, Result};
pub use fetch::{AnchorKey, ContextFetcher, ContextGroup, Direction, SearchQuery, Surrounding};
pub use follow::{FollowEngine, NewLines};
pub use poller::{PollEvent, Poller};
pub use processor::{DefaultProcessor, FormattingProcessor, LineProcessor, Passthrough};
pub use stats::FollowStats;
pub use tracker::{Entry, EntryTracker};
pub use walker::PageWalker;

pub use esfollow_client::{Document, Hit, QueryBackend};
