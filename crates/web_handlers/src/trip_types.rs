use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use trip_services::{DateInfo, Procedure, ProcedureFailure, ProcedureOutcome, StoreError, TripRecord};
use validator::Validate;

/// Request structure for creating a new trip
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTripRequest {
    /// Display name of the trip
    #[validate(length(min = 1, message = "Trip name is required"))]
    pub trip_name: String,

    /// Subscriber creating the trip
    #[validate(length(min = 1, message = "Subscriber ID is required"))]
    pub subscriber_id: String,

    /// ID of the campground to track (RIDB facility ID)
    #[validate(length(min = 1, message = "Location is required"))]
    pub location: String,

    /// Whether alerts should be sent when dates open up
    #[serde(default = "default_notification")]
    pub notification: bool,

    /// Nights to track
    #[validate(length(min = 1, message = "At least one date is required"))]
    pub dates: Vec<TripDateRequest>,
}

fn default_notification() -> bool {
    true
}

/// One night of a trip
#[derive(Debug, Deserialize, Serialize)]
pub struct TripDateRequest {
    /// Night to track
    pub date: NaiveDate,

    /// Campsites to track for this night; empty tracks every campsite
    #[serde(default)]
    pub campsites: Vec<String>,
}

/// Response structure for a created trip
#[derive(Debug, Serialize)]
pub struct CreateTripResponse {
    /// The stored trip
    pub trip: TripRecord,
    /// What each procedure wrote
    pub outcome: ProcedureOutcome,
}

/// Body returned when trip creation fails part way
#[derive(Debug, Serialize)]
pub struct TripFailureResponse {
    /// Error code
    pub error: &'static str,
    /// Human readable failure
    pub message: String,
    /// Procedure that failed
    pub failed_procedure: Procedure,
    /// Procedures that wrote before the failure
    pub completed: Vec<Procedure>,
    /// Dates whose subscriptions were written
    pub changed_dates: BTreeMap<NaiveDate, DateInfo>,
    /// Active requests created before the failure
    pub changed_requests: BTreeMap<String, String>,
    /// Whether every completed procedure was undone
    pub rolled_back: bool,
}

/// Custom error type for trip operations
#[derive(thiserror::Error, Debug)]
pub enum TripApiError {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Trip not found
    #[error("Trip not found")]
    NotFound,

    /// Record store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A procedure failed while creating the trip
    #[error("{failure}")]
    ProcedureFailed {
        /// The failed run
        failure: Box<ProcedureFailure>,
        /// Whether compensation undid every completed procedure
        rolled_back: bool,
    },
}

impl actix_web::ResponseError for TripApiError {
    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        match self {
            TripApiError::Validation(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "validation_error",
                "message": msg
            })),
            TripApiError::NotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": "trip_not_found",
                "message": "Trip not found"
            })),
            TripApiError::ProcedureFailed {
                failure,
                rolled_back,
            } => HttpResponse::InternalServerError().json(TripFailureResponse {
                error: "procedure_failed",
                message: failure.to_string(),
                failed_procedure: failure.error.procedure,
                completed: failure.outcome.completed.clone(),
                changed_dates: failure.outcome.changed_dates.clone(),
                changed_requests: failure.outcome.changed_requests.clone(),
                rolled_back: *rolled_back,
            }),
            TripApiError::Store(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal_error",
                "message": "An internal error occurred"
            })),
        }
    }
}
