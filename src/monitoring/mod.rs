//! Run Monitoring Module
//!
//! Provides the append-only run log and timing reports derived from it.
//!
//! # Components
//!
//! - [`RunLog`]: Timestamped event trail for runs and tasks

pub mod timeline;

pub use timeline::{EventType, LogEntry, RunLog};
