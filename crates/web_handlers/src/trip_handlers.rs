use actix_web::{HttpResponse, Result, web};
use campground_scan::RequestId;
use log::{error, info, warn};
use trip_services::{Collection, DateInfo, Procedure, ProcedureOrchestrator, TripRecord, load};
use uuid::Uuid;
use validator::Validate;

use crate::trip_types::*;

/// Builds the trip record for a validated request
fn build_trip(request: &CreateTripRequest) -> TripRecord {
    let dates = request
        .dates
        .iter()
        .map(|d| {
            let info = DateInfo {
                available: false,
                availability_id: RequestId::for_date(request.location.trim(), d.date).to_string(),
                campsites: d
                    .campsites
                    .iter()
                    .map(|c| (c.clone(), c.clone()))
                    .collect(),
            };
            (d.date, info)
        })
        .collect();

    let requests = request
        .dates
        .iter()
        .map(|d| {
            let req_id = RequestId::for_date(request.location.trim(), d.date).to_string();
            (req_id.clone(), req_id)
        })
        .collect();

    TripRecord {
        trip_name: request.trip_name.trim().to_string(),
        trip_id: Uuid::new_v4().to_string(),
        subscriber_id: request.subscriber_id.trim().to_string(),
        location: request.location.trim().to_string(),
        active: true,
        notification: request.notification,
        requests,
        dates,
    }
}

/// Creates a trip by running every procedure; a failed run is compensated
pub async fn create_trip(
    orchestrator: web::Data<ProcedureOrchestrator>,
    request: web::Json<CreateTripRequest>,
) -> Result<HttpResponse, TripApiError> {
    // Validate the request
    request
        .validate()
        .map_err(|e| TripApiError::Validation(format!("Validation error: {}", e)))?;

    let trip = build_trip(&request);

    match orchestrator.run(&Procedure::ALL, &trip).await {
        Ok(outcome) => {
            info!(
                "Created trip {} for subscriber {}",
                trip.trip_id, trip.subscriber_id
            );
            Ok(HttpResponse::Created().json(CreateTripResponse { trip, outcome }))
        }
        Err(failure) => {
            warn!("Rolling back trip {}: {}", trip.trip_id, failure);
            let rolled_back = match orchestrator.compensate(&trip, &failure.outcome).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Rollback of trip {} incomplete: {}", trip.trip_id, e);
                    false
                }
            };
            Err(TripApiError::ProcedureFailed {
                failure: Box::new(failure),
                rolled_back,
            })
        }
    }
}

/// Gets a trip by ID
pub async fn get_trip(
    orchestrator: web::Data<ProcedureOrchestrator>,
    path: web::Path<String>,
) -> Result<HttpResponse, TripApiError> {
    let trip_id = path.into_inner();
    let trip: TripRecord = load(orchestrator.store().as_ref(), Collection::Trips, &trip_id)
        .await?
        .ok_or(TripApiError::NotFound)?;

    Ok(HttpResponse::Ok().json(trip))
}

/// Liveness check
pub async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "campsite-tracker"
    })))
}
