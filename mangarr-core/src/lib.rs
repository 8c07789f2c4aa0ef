//! # Mangarr Core
//!
//! Core library for Mangarr, a self-hosted manga library tracker. It keeps a
//! catalog of series, volumes and chapters in sync with remote sources,
//! packages chapters as CBZ archives and tells library readers when files
//! change.
//!
//! ## Architecture
//!
//! - [`store`]: catalog and job persistence traits plus an in-memory store
//!   with optional JSON snapshots
//! - [`plugin`]: the source plugin port and its registry
//! - [`archive`]: CBZ writing, `ComicInfo.xml` and atomic file placement
//! - [`pipeline`]: the series sync, chapter download and repackage runners
//! - [`monitor`]: the reconciliation loop and its control handle
//! - [`notify`] / [`progress`]: library notifications and live progress
//! - [`requests`]: enqueueing work and applying user edits
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mangarr_core::{
//!     InMemoryStore, Monitor, MonitorConfig, Notifier, PipelineContext, PluginRegistry,
//!     ProgressHub,
//! };
//!
//! # async fn run() {
//! let plugins = Arc::new(PluginRegistry::default());
//! let ctx = PipelineContext::new(
//!     Arc::new(InMemoryStore::new()),
//!     plugins.clone(),
//!     ProgressHub::new(),
//!     "/tmp/mangarr-cache",
//!     MonitorConfig::default(),
//! );
//! let handle = Monitor::new(ctx, Arc::new(Notifier::new())).spawn();
//! plugins.mark_loaded();
//! handle.trigger();
//! handle.shutdown(std::time::Duration::from_secs(5)).await;
//! # }
//! ```

#![allow(missing_docs)]

pub mod archive;
pub mod error;
pub mod jobs;
pub mod monitor;
pub mod notify;
pub mod pipeline;
pub mod plugin;
pub mod progress;
pub mod requests;
pub mod store;

pub use error::{CoreError, Result};
pub use jobs::{EditChapterJob, JobKind, MonitorChapterJob, MonitorMangaJob};
pub use monitor::{Monitor, MonitorConfig, MonitorHandle, SweepReport};
pub use notify::{KavitaClient, KavitaConfig, KavitaConnector, Notifier, NotifyConnector};
pub use pipeline::{ChapterOutcome, EditOutcome, MangaOutcome, PipelineContext};
pub use plugin::{PageRef, PluginError, PluginRegistry, RetryPolicy, SourceHandle, SourcePlugin};
pub use progress::{ProgressHub, ProgressObserver};
pub use requests::Requests;
pub use store::{CatalogStore, InMemoryStore, JobCounts, JobStore, Store, StoreError};
