use std::sync::Arc;

use async_trait::async_trait;
use campground_scan::{ChangeConsumer, DateChanges, ScanError, Snapshot, UnitAvailability};
use chrono::NaiveDate;
use log::{debug, info};

use crate::record_store::{Collection, load_all};
use crate::service::ProcedureOrchestrator;
use crate::types::{DateInfo, TripRecord};

/// Feeds detected availability changes into the trips that depend on them
pub struct TripAvailabilityUpdater {
    orchestrator: Arc<ProcedureOrchestrator>,
}

impl TripAvailabilityUpdater {
    /// Create an updater that rewrites trips through `orchestrator`
    pub fn new(orchestrator: Arc<ProcedureOrchestrator>) -> Self {
        Self { orchestrator }
    }

    async fn dependent_trips(&self, req_id: &str) -> Result<Vec<String>, ScanError> {
        let trips: Vec<TripRecord> =
            load_all(self.orchestrator.store().as_ref(), Collection::Trips)
                .await
                .map_err(|e| ScanError::Downstream(format!("Failed to load trips: {}", e)))?;

        Ok(trips
            .into_iter()
            .filter(|trip| trip.active && trip.requests.contains_key(req_id))
            .map(|trip| trip.trip_id)
            .collect())
    }
}

/// A date is open when a tracked campsite is available, or any campsite when none are tracked
fn is_available(info: &DateInfo, units: &UnitAvailability) -> bool {
    if info.campsites.is_empty() {
        units.values().any(|available| *available)
    } else {
        info.campsites
            .keys()
            .any(|unit| units.get(unit).copied().unwrap_or(false))
    }
}

/// Re-evaluate every changed date of the trip against the current snapshot.
/// Returns the dates that just opened up, or `None` when nothing changed.
fn reevaluate(
    trip: &mut TripRecord,
    changes: &DateChanges,
    current: &Snapshot,
) -> Option<Vec<NaiveDate>> {
    let empty = UnitAvailability::new();
    let mut changed = false;
    let mut opened = Vec::new();

    for date in changes.keys() {
        let Some(info) = trip.dates.get_mut(date) else {
            continue;
        };
        let available = is_available(info, current.get(date).unwrap_or(&empty));
        if available != info.available {
            info.available = available;
            changed = true;
            if available {
                opened.push(*date);
            }
        }
    }

    changed.then_some(opened)
}

#[async_trait]
impl ChangeConsumer for TripAvailabilityUpdater {
    async fn apply(
        &self,
        req_id: &str,
        changes: &DateChanges,
        current: &Snapshot,
    ) -> Result<(), ScanError> {
        let trip_ids = self.dependent_trips(req_id).await?;
        debug!("{} active trips depend on {}", trip_ids.len(), req_id);

        for trip_id in trip_ids {
            let mut opened = Vec::new();
            let updated = self
                .orchestrator
                .update_trip(&trip_id, |trip| {
                    if !trip.active {
                        return false;
                    }
                    match reevaluate(trip, changes, current) {
                        Some(dates) => {
                            opened = dates;
                            true
                        }
                        None => false,
                    }
                })
                .await
                .map_err(|failure| {
                    ScanError::Downstream(format!("Failed to update trip {}: {}", trip_id, failure))
                })?;

            let Some(trip) = updated else {
                continue;
            };
            if trip.notification && !opened.is_empty() {
                info!(
                    "Campsites opened for trip {} ({}) on {:?}",
                    trip.trip_id, trip.subscriber_id, opened
                );
            } else {
                debug!("Updated availability of trip {}", trip.trip_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::{InMemoryRecordStore, YieldingStore, load, save};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn units(entries: &[(&str, bool)]) -> UnitAvailability {
        entries
            .iter()
            .map(|(unit, available)| (unit.to_string(), *available))
            .collect()
    }

    /// Current snapshot equal to the change payload, as for any non-removal change
    fn current(changes: &DateChanges) -> Snapshot {
        changes.clone().into_iter().collect()
    }

    fn trip(trip_id: &str, campsites: &[&str]) -> TripRecord {
        let info = DateInfo {
            available: false,
            availability_id: String::new(),
            campsites: campsites
                .iter()
                .map(|c| (c.to_string(), c.to_string()))
                .collect(),
        };
        TripRecord {
            trip_name: trip_id.to_string(),
            trip_id: trip_id.to_string(),
            subscriber_id: "s1".to_string(),
            location: "232447".to_string(),
            active: true,
            notification: true,
            requests: [("232447_2024-06".to_string(), "232447_2024-06".to_string())].into(),
            dates: [
                (date("2024-06-01"), info.clone()),
                (date("2024-06-02"), info),
            ]
            .into(),
        }
    }

    async fn setup(trips: &[TripRecord]) -> (InMemoryRecordStore, TripAvailabilityUpdater) {
        let store = InMemoryRecordStore::new();
        for trip in trips {
            save(&store, Collection::Trips, &trip.trip_id, trip)
                .await
                .unwrap();
        }
        let orchestrator = Arc::new(ProcedureOrchestrator::new(Arc::new(store.clone())));
        (store, TripAvailabilityUpdater::new(orchestrator))
    }

    async fn stored(store: &InMemoryRecordStore, trip_id: &str) -> TripRecord {
        load(store, Collection::Trips, trip_id)
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_is_available_respects_tracked_campsites() {
        let any = DateInfo::default();
        let tracked = DateInfo {
            campsites: [("B".to_string(), "B".to_string())].into(),
            ..DateInfo::default()
        };
        let open_a = units(&[("A", true), ("B", false)]);

        assert!(is_available(&any, &open_a));
        assert!(!is_available(&tracked, &open_a));
        assert!(is_available(&tracked, &units(&[("B", true)])));
        assert!(!is_available(&any, &UnitAvailability::new()));
    }

    #[tokio::test]
    async fn test_opened_dates_are_written() {
        let (store, updater) = setup(&[trip("t1", &[]), trip("t2", &["B"])]).await;
        let changes = DateChanges::from([(date("2024-06-01"), units(&[("A", true)]))]);

        updater
            .apply("232447_2024-06", &changes, &current(&changes))
            .await
            .unwrap();

        let t1 = stored(&store, "t1").await;
        assert!(t1.dates[&date("2024-06-01")].available);
        assert!(!t1.dates[&date("2024-06-02")].available);

        let t2 = stored(&store, "t2").await;
        assert!(!t2.dates[&date("2024-06-01")].available);
    }

    #[tokio::test]
    async fn test_unchanged_trips_are_not_rewritten() {
        let (store, updater) = setup(&[trip("t1", &[])]).await;
        let writes = store.write_count(Collection::Trips).await;
        let changes = DateChanges::from([(date("2024-06-01"), units(&[("A", false)]))]);

        updater
            .apply("232447_2024-06", &changes, &current(&changes))
            .await
            .unwrap();

        assert_eq!(store.write_count(Collection::Trips).await, writes);
    }

    #[tokio::test]
    async fn test_inactive_and_unrelated_trips_are_skipped() {
        let mut inactive = trip("t1", &[]);
        inactive.active = false;
        let mut other_month = trip("t2", &[]);
        other_month.requests =
            [("232447_2024-07".to_string(), "232447_2024-07".to_string())].into();

        let (store, updater) = setup(&[inactive, other_month]).await;
        let changes = DateChanges::from([(date("2024-06-01"), units(&[("A", true)]))]);

        updater
            .apply("232447_2024-06", &changes, &current(&changes))
            .await
            .unwrap();

        assert!(!stored(&store, "t1").await.dates[&date("2024-06-01")].available);
        assert!(!stored(&store, "t2").await.dates[&date("2024-06-01")].available);
    }

    #[tokio::test]
    async fn test_closed_date_is_cleared() {
        let mut open = trip("t1", &[]);
        open.dates.get_mut(&date("2024-06-01")).unwrap().available = true;
        let (store, updater) = setup(&[open]).await;
        let changes = DateChanges::from([(date("2024-06-01"), units(&[("A", false)]))]);

        updater
            .apply("232447_2024-06", &changes, &current(&changes))
            .await
            .unwrap();

        assert!(!stored(&store, "t1").await.dates[&date("2024-06-01")].available);
    }

    #[tokio::test]
    async fn test_removed_unit_closes_date() {
        let mut open = trip("t1", &[]);
        open.dates.get_mut(&date("2024-06-01")).unwrap().available = true;
        let (store, updater) = setup(&[open]).await;

        // B was the only open campsite and disappeared; the change carries the old map
        let changes =
            DateChanges::from([(date("2024-06-01"), units(&[("A", false), ("B", true)]))]);
        let now: Snapshot = [(date("2024-06-01"), units(&[("A", false)]))]
            .into_iter()
            .collect();

        updater.apply("232447_2024-06", &changes, &now).await.unwrap();

        assert!(!stored(&store, "t1").await.dates[&date("2024-06-01")].available);
    }

    #[tokio::test]
    async fn test_vanished_date_closes_date() {
        let mut open = trip("t1", &[]);
        open.dates.get_mut(&date("2024-06-01")).unwrap().available = true;
        let (store, updater) = setup(&[open]).await;
        let changes = DateChanges::from([(date("2024-06-01"), units(&[("A", true)]))]);

        updater
            .apply("232447_2024-06", &changes, &Snapshot::new())
            .await
            .unwrap();

        assert!(!stored(&store, "t1").await.dates[&date("2024-06-01")].available);
    }

    #[tokio::test]
    async fn test_concurrent_months_of_one_trip_both_land() {
        let store = YieldingStore::default();
        let mut spanning = trip("t1", &[]);
        spanning.requests = [
            ("232447_2024-06".to_string(), "232447_2024-06".to_string()),
            ("232447_2024-07".to_string(), "232447_2024-07".to_string()),
        ]
        .into();
        spanning.dates = [
            (date("2024-06-30"), DateInfo::default()),
            (date("2024-07-01"), DateInfo::default()),
        ]
        .into();
        save(&store.inner, Collection::Trips, "t1", &spanning)
            .await
            .unwrap();

        let orchestrator = Arc::new(ProcedureOrchestrator::new(Arc::new(store.clone())));
        let updater = TripAvailabilityUpdater::new(orchestrator);

        let june = DateChanges::from([(date("2024-06-30"), units(&[("A", true)]))]);
        let july = DateChanges::from([(date("2024-07-01"), units(&[("A", true)]))]);
        let (june_now, july_now) = (current(&june), current(&july));

        let (a, b) = tokio::join!(
            updater.apply("232447_2024-06", &june, &june_now),
            updater.apply("232447_2024-07", &july, &july_now),
        );
        a.unwrap();
        b.unwrap();

        let trip = stored(&store.inner, "t1").await;
        assert!(trip.dates[&date("2024-06-30")].available);
        assert!(trip.dates[&date("2024-07-01")].available);
    }

    #[tokio::test]
    async fn test_write_failure_is_downstream_error() {
        let (store, updater) = setup(&[trip("t1", &[])]).await;
        store.set_fail_on_put(Collection::Trips, 0).await;
        let changes = DateChanges::from([(date("2024-06-01"), units(&[("A", true)]))]);

        let result = updater
            .apply("232447_2024-06", &changes, &current(&changes))
            .await;

        assert!(matches!(result, Err(ScanError::Downstream(_))));
    }
}
