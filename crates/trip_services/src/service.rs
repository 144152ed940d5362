use std::sync::Arc;

use campground_scan::{ActiveRequest, DEFAULT_AVAILABILITY_API, KeyedLocks};
use log::{debug, error, info, warn};

use crate::record_store::{Collection, RecordStore, load, load_all, save, subscription_key};
use crate::types::*;

/// Applies trip procedures across the record store collections.
///
/// The store has no multi-document transactions, so a run reports exactly what
/// it wrote. On failure the caller gets the partial ledger back and decides
/// whether to retry the remaining procedures or [`compensate`](Self::compensate).
///
/// Documents that several writers read-modify-write (a trip, a subscriber, an
/// active request) are guarded by per-key locks, so concurrent runs sharing one
/// orchestrator never overwrite each other's changes.
pub struct ProcedureOrchestrator {
    store: Arc<dyn RecordStore>,
    availability_api: String,
    trip_locks: KeyedLocks,
    subscriber_locks: KeyedLocks,
    request_locks: KeyedLocks,
}

impl ProcedureOrchestrator {
    /// Create an orchestrator over `store`
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            availability_api: DEFAULT_AVAILABILITY_API.to_string(),
            trip_locks: KeyedLocks::new(),
            subscriber_locks: KeyedLocks::new(),
            request_locks: KeyedLocks::new(),
        }
    }

    /// Use a different availability endpoint when registering active requests
    pub fn with_availability_api(mut self, availability_api: impl Into<String>) -> Self {
        self.availability_api = availability_api.into();
        self
    }

    /// The underlying record store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Run `procedures` in order for `trip`, stopping at the first failure
    pub async fn run(
        &self,
        procedures: &[Procedure],
        trip: &TripRecord,
    ) -> Result<ProcedureOutcome, ProcedureFailure> {
        let mut outcome = ProcedureOutcome::default();

        for &procedure in procedures {
            let result = match procedure {
                Procedure::TripMetadata => self.add_trip(trip).await,
                Procedure::SubscriberMetadata => {
                    self.link_subscriber(&trip.subscriber_id, &trip.trip_id)
                        .await
                }
                Procedure::SubscriptionMetadata => self.add_subscriptions(trip, &mut outcome).await,
                Procedure::ActiveRequests => self.register_requests(trip, &mut outcome).await,
            };

            match result {
                Ok(()) => {
                    debug!("Procedure {} completed for trip {}", procedure, trip.trip_id);
                    outcome.completed.push(procedure);
                }
                Err(source) => {
                    error!(
                        "Procedure {} failed for trip {}: {}",
                        procedure, trip.trip_id, source
                    );
                    if outcome.partially_applied(procedure) {
                        outcome.completed.push(procedure);
                    }
                    return Err(ProcedureFailure {
                        outcome,
                        error: ProcedureError { procedure, source },
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Re-read a stored trip and rewrite it if `update` reports a change.
    ///
    /// The read, the update and the `[TripMetadata]` write happen under the
    /// trip's lock. Returns the written trip, or `None` when the trip does not
    /// exist or `update` left it unchanged.
    pub async fn update_trip<F>(
        &self,
        trip_id: &str,
        update: F,
    ) -> Result<Option<TripRecord>, ProcedureFailure>
    where
        F: FnOnce(&mut TripRecord) -> bool + Send,
    {
        let _guard = self.trip_locks.acquire(trip_id).await;

        let stored: Option<TripRecord> =
            load(self.store.as_ref(), Collection::Trips, trip_id)
                .await
                .map_err(|source| ProcedureFailure {
                    outcome: ProcedureOutcome::default(),
                    error: ProcedureError {
                        procedure: Procedure::TripMetadata,
                        source,
                    },
                })?;

        let Some(mut trip) = stored else {
            return Ok(None);
        };
        if !update(&mut trip) {
            return Ok(None);
        }

        self.run(&[Procedure::TripMetadata], &trip).await?;
        Ok(Some(trip))
    }

    /// Undo what a run of `trip` wrote, newest procedure first.
    ///
    /// Meant for runs that created the trip: the trip document is deleted
    /// rather than restored. Every completed procedure is attempted even if an
    /// earlier undo fails.
    pub async fn compensate(
        &self,
        trip: &TripRecord,
        outcome: &ProcedureOutcome,
    ) -> Result<(), CompensationError> {
        let mut failures = Vec::new();

        for &procedure in outcome.completed.iter().rev() {
            let result = match procedure {
                Procedure::ActiveRequests => self.remove_requests(&trip.trip_id, outcome).await,
                Procedure::SubscriptionMetadata => {
                    self.remove_subscriptions(&trip.trip_id, outcome).await
                }
                Procedure::SubscriberMetadata => {
                    self.unlink_subscriber(&trip.subscriber_id, &trip.trip_id)
                        .await
                }
                Procedure::TripMetadata => {
                    self.store.delete(Collection::Trips, &trip.trip_id).await
                }
            };

            match result {
                Ok(()) => info!("Compensated {} for trip {}", procedure, trip.trip_id),
                Err(e) => {
                    error!(
                        "Failed to compensate {} for trip {}: {}",
                        procedure, trip.trip_id, e
                    );
                    failures.push((procedure, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CompensationError { failures })
        }
    }

    async fn add_trip(&self, trip: &TripRecord) -> Result<(), StoreError> {
        save(self.store.as_ref(), Collection::Trips, &trip.trip_id, trip).await
    }

    async fn link_subscriber(&self, subscriber_id: &str, trip_id: &str) -> Result<(), StoreError> {
        let _guard = self.subscriber_locks.acquire(subscriber_id).await;
        let mut subscriber: SubscriberRecord =
            load(self.store.as_ref(), Collection::Subscribers, subscriber_id)
                .await?
                .unwrap_or_else(|| SubscriberRecord {
                    subscriber_id: subscriber_id.to_string(),
                    ..SubscriberRecord::default()
                });

        subscriber
            .trips
            .insert(trip_id.to_string(), trip_id.to_string());

        save(
            self.store.as_ref(),
            Collection::Subscribers,
            subscriber_id,
            &subscriber,
        )
        .await
    }

    async fn unlink_subscriber(&self, subscriber_id: &str, trip_id: &str) -> Result<(), StoreError> {
        let _guard = self.subscriber_locks.acquire(subscriber_id).await;
        let subscriber: Option<SubscriberRecord> =
            load(self.store.as_ref(), Collection::Subscribers, subscriber_id).await?;

        match subscriber {
            Some(mut subscriber) => {
                subscriber.trips.remove(trip_id);
                save(
                    self.store.as_ref(),
                    Collection::Subscribers,
                    subscriber_id,
                    &subscriber,
                )
                .await
            }
            None => Ok(()),
        }
    }

    /// One subscription per date, recording each committed date as it goes
    async fn add_subscriptions(
        &self,
        trip: &TripRecord,
        outcome: &mut ProcedureOutcome,
    ) -> Result<(), StoreError> {
        for (date, info) in &trip.dates {
            let subscription = SubscriptionRecord {
                trip_id: trip.trip_id.clone(),
                date: *date,
                location: trip.location.clone(),
            };
            save(
                self.store.as_ref(),
                Collection::Subscriptions,
                &subscription_key(&trip.trip_id, date),
                &subscription,
            )
            .await?;

            outcome.changed_dates.insert(*date, info.clone());
        }
        Ok(())
    }

    async fn remove_subscriptions(
        &self,
        trip_id: &str,
        outcome: &ProcedureOutcome,
    ) -> Result<(), StoreError> {
        for date in outcome.changed_dates.keys() {
            self.store
                .delete(Collection::Subscriptions, &subscription_key(trip_id, date))
                .await?;
        }
        Ok(())
    }

    /// Create every referenced active request that does not exist yet
    async fn register_requests(
        &self,
        trip: &TripRecord,
        outcome: &mut ProcedureOutcome,
    ) -> Result<(), StoreError> {
        for req_id in trip.requests.keys() {
            let _guard = self.request_locks.acquire(req_id).await;
            if self
                .store
                .get(Collection::ActiveRequests, req_id)
                .await?
                .is_some()
            {
                debug!("Active request {} already registered", req_id);
                continue;
            }

            let request =
                ActiveRequest::new(req_id, trip.dates.keys().copied(), &self.availability_api)
                    .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;

            save(
                self.store.as_ref(),
                Collection::ActiveRequests,
                &request.req_id,
                &request,
            )
            .await?;

            info!("Registered active request {} for trip {}", req_id, trip.trip_id);
            outcome
                .changed_requests
                .insert(req_id.clone(), req_id.clone());
        }
        Ok(())
    }

    /// Delete the requests this run created, unless another trip now depends on them
    async fn remove_requests(
        &self,
        trip_id: &str,
        outcome: &ProcedureOutcome,
    ) -> Result<(), StoreError> {
        for req_id in outcome.changed_requests.keys() {
            let _guard = self.request_locks.acquire(req_id).await;

            let trips: Vec<TripRecord> = load_all(self.store.as_ref(), Collection::Trips).await?;
            if let Some(other) = trips
                .iter()
                .find(|t| t.trip_id != trip_id && t.requests.contains_key(req_id))
            {
                info!(
                    "Keeping active request {}, trip {} depends on it",
                    req_id, other.trip_id
                );
                continue;
            }

            if let Err(e) = self.store.delete(Collection::ActiveRequests, req_id).await {
                warn!("Failed to remove active request {}: {}", req_id, e);
                return Err(e);
            }
        }
        Ok(())
    }
}
