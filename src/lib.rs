//! Background synchronization runtime for feature flag SDKs.
//!
//! # Overview
//!
//! A [`Client`] keeps a local, in-memory snapshot of feature flags ("splits") and segments (named
//! sets of keys) in sync with the backend, so that evaluation never waits on the network. It also
//! ships back what evaluation produces: impressions, events, impression counts, unique keys and
//! telemetry.
//!
//! Collections are versioned by change numbers. Fetching resumes from the stored change number
//! and continues until the backend reports no further changes. On-demand synchronization towards a
//! known change number (as announced by a push notification) retries with backoff and falls back
//! to bypassing CDN caches when the target cannot be reached otherwise.
//!
//! Background work happens on plain threads: one per periodic task plus a small worker pool used
//! to fetch segments concurrently.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Failing to reach a target change number is not an error: operations report it as a `bool`.
//! Errors in background tasks are logged and retried on the next run. Only errors retrying cannot
//! fix (e.g. an invalid API key) are reported back, through [`Client::block_until_ready`].
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, with target `splitsync` and structured key-values. Consider integrating a
//! `log`-compatible logger implementation for better visibility into synchronization.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
mod backoff;
mod client;
mod config;
mod error;
pub mod impressions;
pub mod models;
mod registry;
pub mod storage;
pub mod sync;
pub mod tasks;

pub use backoff::Backoff;
pub use client::{Backend, Client};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use impressions::ImpressionsMode;
pub use registry::FactoryRegistry;
