use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A subscriber's booking intent for one campground
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRecord {
    /// Display name of the trip
    pub trip_name: String,
    /// Unique identifier of the trip
    pub trip_id: String,
    /// Owning subscriber
    pub subscriber_id: String,
    /// Campground the trip targets
    pub location: String,
    /// Whether the trip is still being tracked
    pub active: bool,
    /// Whether the subscriber wants alerts for this trip
    pub notification: bool,
    /// Monitored requests this trip depends on (request id to request id)
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    /// Per-date tracking state
    #[serde(default)]
    pub dates: BTreeMap<NaiveDate, DateInfo>,
}

/// Tracking state of one trip date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInfo {
    /// Whether any tracked campsite is available on this date
    pub available: bool,
    /// Identifier of the availability entry this date is tracked under
    #[serde(default)]
    pub availability_id: String,
    /// Campsites tracked for this date (unit id to unit id); empty means any campsite
    #[serde(default)]
    pub campsites: BTreeMap<String, String>,
}

/// Subscriber document: the trips a subscriber owns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    /// Subscriber id
    pub subscriber_id: String,
    /// Owned trip ids (trip id to trip id)
    #[serde(default)]
    pub trips: BTreeMap<String, String>,
}

/// Subscription document: one trip date at one location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Trip the subscription belongs to
    pub trip_id: String,
    /// Subscribed date
    pub date: NaiveDate,
    /// Campground of the trip
    pub location: String,
}

/// Named update operation, each targeting one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Procedure {
    /// Write the trip document
    TripMetadata,
    /// Link the subscriber to the trip
    SubscriberMetadata,
    /// Write one subscription per trip date
    SubscriptionMetadata,
    /// Register missing active requests for the trip's requests
    ActiveRequests,
}

impl Procedure {
    /// Every procedure, in the order a new trip needs them
    pub const ALL: [Procedure; 4] = [
        Procedure::TripMetadata,
        Procedure::SubscriberMetadata,
        Procedure::SubscriptionMetadata,
        Procedure::ActiveRequests,
    ];

    /// Stable name used in logs and API responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Procedure::TripMetadata => "trip-metadata",
            Procedure::SubscriberMetadata => "subscriber-metadata",
            Procedure::SubscriptionMetadata => "subscription-metadata",
            Procedure::ActiveRequests => "active-requests",
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger of a procedure run.
///
/// A procedure that failed after writing part of its documents still appears
/// in `completed`; `changed_dates` and `changed_requests` tell exactly which
/// of its documents were written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcedureOutcome {
    /// Procedures that wrote to the store, in execution order
    pub completed: Vec<Procedure>,
    /// Dates whose subscription document was written
    pub changed_dates: BTreeMap<NaiveDate, DateInfo>,
    /// Active requests created by this run
    pub changed_requests: BTreeMap<String, String>,
}

impl ProcedureOutcome {
    /// Whether a failing procedure already left documents behind
    pub(crate) fn partially_applied(&self, procedure: Procedure) -> bool {
        match procedure {
            Procedure::SubscriptionMetadata => !self.changed_dates.is_empty(),
            Procedure::ActiveRequests => !self.changed_requests.is_empty(),
            Procedure::TripMetadata | Procedure::SubscriberMetadata => false,
        }
    }
}

/// Record store failure. A missing document is not an error; reads return `None`.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Backend read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Document content is not valid for its collection
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// A store failure attributed to the procedure that hit it
#[derive(thiserror::Error, Debug)]
#[error("Procedure '{procedure}' failed: {source}")]
pub struct ProcedureError {
    /// The failing procedure
    pub procedure: Procedure,
    /// Underlying store failure
    #[source]
    pub source: StoreError,
}

/// A failed run, carrying the partial ledger needed to finish or undo it
#[derive(thiserror::Error, Debug)]
#[error("{error}")]
pub struct ProcedureFailure {
    /// What was written before the failure
    pub outcome: ProcedureOutcome,
    /// Why the run stopped
    #[source]
    pub error: ProcedureError,
}

/// Procedures that could not be undone
#[derive(thiserror::Error, Debug)]
#[error("Compensation failed for {}", procedure_names(.failures))]
pub struct CompensationError {
    /// Each procedure that failed to undo, with its error
    pub failures: Vec<(Procedure, StoreError)>,
}

fn procedure_names(failures: &[(Procedure, StoreError)]) -> String {
    failures
        .iter()
        .map(|(procedure, _)| procedure.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
