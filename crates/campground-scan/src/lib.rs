//! # Campground Scan
//!
//! This crate detects campsite availability changes for monitored campground
//! months and commits them in stages. A freshly fetched snapshot is staged next
//! to the last promoted one and only replaces it once every downstream update
//! triggered by its changes has succeeded.

/// Types for campground scan operations
mod scan_types;
pub use scan_types::*;

/// Snapshot comparison
mod diff;
pub use diff::*;

/// Client for fetching availability from recreation.gov
mod rec_gov_client;
pub use rec_gov_client::*;

/// Staging and baseline snapshot storage
mod snapshot_store;
pub use snapshot_store::*;

/// Per-key async locks
mod keyed_locks;
pub use keyed_locks::*;

/// Staged-commit scan cycles
mod executor;
pub use executor::*;
