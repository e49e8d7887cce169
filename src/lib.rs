//! imgpull: periodic image puller with a web-configurable schedule.
//!
//! A single background worker fetches an image from a configured URL on a
//! fixed interval (inside a daily time window), stores it under a
//! timestamped name, publishes a `latest` pointer to it, and optionally
//! relays it to an FTP destination. A small web page edits the settings at
//! runtime; saving restarts the worker so changes apply immediately.
//!
//! # Architecture
//!
//! - **config**: flat settings record, JSON persistence, snapshot/replace store
//! - **scheduler**: one cancellable worker on a drifting schedule
//! - **pipeline**: gate → bounded-retry fetch → publish → optional upload
//! - **store**: immutable artifacts + atomic `latest` pointer swap
//! - **relay**: one-shot FTPS transfer
//! - **web**: settings form + log tail (thin collaborator)

pub mod config;
pub mod error;
pub mod pipeline;
pub mod relay;
pub mod scheduler;
pub mod store;
pub mod web;

pub use config::{Settings, SettingsStore};
pub use error::{PullError, Result};
pub use pipeline::{CycleOutcome, UploadStatus, run_cycle};
pub use scheduler::PullScheduler;
pub use store::ArtifactStore;
