//! # Trip Services
//!
//! Trip records and the procedures that keep them consistent across collections.
//! It includes the record store abstraction, the procedure orchestrator with
//! compensation, and the consumer that feeds availability changes into trips.

/// Document store and its in-memory implementation.
pub mod record_store;
/// Procedure orchestration and compensation.
pub mod service;
/// Records, procedures and error types.
pub mod types;
/// Availability change consumer for trips.
pub mod updater;

pub use record_store::{Collection, InMemoryRecordStore, RecordStore, load, load_all, save};
pub use service::ProcedureOrchestrator;
pub use types::*;
pub use updater::TripAvailabilityUpdater;
