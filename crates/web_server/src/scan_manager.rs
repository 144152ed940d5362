use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use campground_scan::{ActiveRequest, ScanExecutor, ScanReport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use trip_services::{Collection, RecordStore, StoreError, load, load_all, save};

/// Manager for the scan execution system
/// Integrates with the web server to provide background scanning
pub struct ScanManager {
    executor: Arc<ScanExecutor>,
    store: Arc<dyn RecordStore>,
    interval: Duration,
    shutdown: Option<watch::Sender<bool>>,
    executor_handle: Option<JoinHandle<()>>,
}

impl ScanManager {
    /// Create a new scan manager
    pub fn new(executor: Arc<ScanExecutor>, store: Arc<dyn RecordStore>, interval: Duration) -> Self {
        Self {
            executor,
            store,
            interval,
            shutdown: None,
            executor_handle: None,
        }
    }

    /// Start scanning in a background task, one cycle per interval
    pub fn start(&mut self) {
        if self.executor_handle.is_some() {
            warn!("Scan execution system already running");
            return;
        }
        info!(
            "Starting scan execution system (interval: {:?})",
            self.interval
        );

        let (tx, mut rx) = watch::channel(false);
        let executor = self.executor.clone();
        let store = self.store.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = run_once(&executor, store.as_ref(), &rx).await {
                    error!("Scan cycle failed: {}", e);
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.wait_for(|stop| *stop) => break,
                }
            }
            info!("Scan loop exited");
        });

        self.shutdown = Some(tx);
        self.executor_handle = Some(handle);
    }

    /// Stop the scan execution engine, letting in-flight requests fail as cancelled
    pub async fn stop(&mut self) {
        info!("Stopping scan execution system");

        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.executor_handle.take() {
            if let Err(e) = handle.await {
                error!("Scan loop panicked: {}", e);
            }
        }

        info!("Scan execution system stopped");
    }
}

/// Run one cycle over every stored active request and persist their `update` flags
pub async fn run_once(
    executor: &ScanExecutor,
    store: &dyn RecordStore,
    shutdown: &watch::Receiver<bool>,
) -> Result<ScanReport, StoreError> {
    let mut requests: BTreeMap<String, ActiveRequest> =
        load_all::<ActiveRequest>(store, Collection::ActiveRequests)
            .await?
            .into_iter()
            .map(|request| (request.req_id.clone(), request))
            .collect();

    if requests.is_empty() {
        info!("No active requests to scan");
        return Ok(ScanReport::default());
    }

    let previous: BTreeMap<String, bool> = requests
        .iter()
        .map(|(req_id, request)| (req_id.clone(), request.update))
        .collect();

    let report = executor.run_cycle(&mut requests, shutdown).await;

    for (req_id, request) in &requests {
        if previous.get(req_id) == Some(&request.update) {
            continue;
        }
        if let Err(e) = write_flag(store, req_id, request.update).await {
            warn!("Failed to save update flag of {}: {}", req_id, e);
        }
    }

    Ok(report)
}

/// Set `update` on the stored request; requests removed during the cycle stay removed
async fn write_flag(store: &dyn RecordStore, req_id: &str, update: bool) -> Result<(), StoreError> {
    let Some(mut stored) = load::<ActiveRequest>(store, Collection::ActiveRequests, req_id).await?
    else {
        info!("Active request {} was removed during the cycle", req_id);
        return Ok(());
    };

    stored.update = update;
    save(store, Collection::ActiveRequests, req_id, &stored).await
}

impl Drop for ScanManager {
    fn drop(&mut self) {
        if let Some(handle) = self.executor_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use campground_scan::{
        DEFAULT_AVAILABILITY_API, FetchConfig, InMemorySnapshotStore, ScanConfig, ScanError,
        SourceFetcher, baseline_key,
    };
    use chrono::NaiveDate;
    use trip_services::{
        DateInfo, InMemoryRecordStore, Procedure, ProcedureOrchestrator, TripAvailabilityUpdater,
        TripRecord,
    };

    use super::*;

    const BODY: &str = r#"{"campsites": {"A": {"availabilities": {"2024-06-01T00:00:00Z": "Available"}}}}"#;

    struct StaticFetcher {
        fail: bool,
        /// Deletes the June request mid-fetch, as a concurrent rollback would
        remove_from: Option<InMemoryRecordStore>,
    }

    #[async_trait]
    impl SourceFetcher for StaticFetcher {
        async fn fetch(&self, _target: &str, _referer: &str) -> Result<Vec<u8>, ScanError> {
            if let Some(store) = &self.remove_from {
                store
                    .delete(Collection::ActiveRequests, "232447_2024-06")
                    .await
                    .unwrap();
            }
            if self.fail {
                return Err(ScanError::Fetch("connection refused".to_string()));
            }
            Ok(BODY.as_bytes().to_vec())
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn setup(fail: bool) -> (InMemoryRecordStore, InMemorySnapshotStore, Arc<ScanExecutor>) {
        setup_with(fail, false).await
    }

    async fn setup_with(
        fail: bool,
        remove_mid_cycle: bool,
    ) -> (InMemoryRecordStore, InMemorySnapshotStore, Arc<ScanExecutor>) {
        let store = InMemoryRecordStore::new();
        let snapshots = InMemorySnapshotStore::new();
        let orchestrator = Arc::new(ProcedureOrchestrator::new(Arc::new(store.clone())));

        let trip = TripRecord {
            trip_name: "June".to_string(),
            trip_id: "t1".to_string(),
            subscriber_id: "s1".to_string(),
            location: "232447".to_string(),
            active: true,
            notification: true,
            requests: [("232447_2024-06".to_string(), "232447_2024-06".to_string())].into(),
            dates: [(date("2024-06-01"), DateInfo::default())].into(),
        };
        orchestrator
            .run(&[Procedure::TripMetadata, Procedure::ActiveRequests], &trip)
            .await
            .unwrap();

        let executor = Arc::new(ScanExecutor::new(
            Arc::new(StaticFetcher {
                fail,
                remove_from: remove_mid_cycle.then(|| store.clone()),
            }),
            Arc::new(snapshots.clone()),
            Arc::new(TripAvailabilityUpdater::new(orchestrator)),
            FetchConfig::default(),
            Some(ScanConfig {
                request_delay: Duration::ZERO,
                ..ScanConfig::default()
            }),
        ));
        (store, snapshots, executor)
    }

    #[tokio::test]
    async fn test_run_once_promotes_and_updates_trips() {
        let (store, snapshots, executor) = setup(false).await;
        let (_tx, rx) = watch::channel(false);

        let report = run_once(&executor, &store, &rx).await.unwrap();

        assert!(report.promoted.contains("232447_2024-06"));
        assert!(snapshots.contains(&baseline_key("232447_2024-06")).await);

        let request: ActiveRequest = load(&store, Collection::ActiveRequests, "232447_2024-06")
            .await
            .unwrap()
            .unwrap();
        assert!(request.update);
        assert!(request.url.starts_with(DEFAULT_AVAILABILITY_API));

        let trip: TripRecord = load(&store, Collection::Trips, "t1").await.unwrap().unwrap();
        assert!(trip.dates[&date("2024-06-01")].available);
    }

    #[tokio::test]
    async fn test_run_once_keeps_flag_down_on_failure() {
        let (store, snapshots, executor) = setup(true).await;
        let (_tx, rx) = watch::channel(false);
        let writes = store.write_count(Collection::ActiveRequests).await;

        let report = run_once(&executor, &store, &rx).await.unwrap();

        assert!(report.held.contains_key("232447_2024-06"));
        assert!(!snapshots.contains(&baseline_key("232447_2024-06")).await);
        assert_eq!(store.write_count(Collection::ActiveRequests).await, writes);
    }

    #[tokio::test]
    async fn test_request_removed_during_cycle_stays_removed() {
        let (store, _snapshots, executor) = setup_with(false, true).await;
        let (_tx, rx) = watch::channel(false);

        let report = run_once(&executor, &store, &rx).await.unwrap();

        assert!(report.promoted.contains("232447_2024-06"));
        assert!(
            store
                .get(Collection::ActiveRequests, "232447_2024-06")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_flag_save_failure_does_not_fail_cycle() {
        let (store, _snapshots, executor) = setup(false).await;
        store.set_fail_on_put(Collection::ActiveRequests, 0).await;
        let (_tx, rx) = watch::channel(false);

        let report = run_once(&executor, &store, &rx).await.unwrap();

        assert!(report.promoted.contains("232447_2024-06"));
        let request: ActiveRequest = load(&store, Collection::ActiveRequests, "232447_2024-06")
            .await
            .unwrap()
            .unwrap();
        assert!(!request.update);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (store, snapshots, executor) = setup(false).await;
        let mut manager = ScanManager::new(
            executor,
            Arc::new(store.clone()),
            Duration::from_secs(3600),
        );

        manager.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !snapshots.contains(&baseline_key("232447_2024-06")).await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), manager.stop())
            .await
            .unwrap();
        assert!(manager.executor_handle.is_none());
    }
}
