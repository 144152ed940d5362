use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::diff::diff;
use crate::keyed_locks::KeyedLocks;
use crate::rec_gov_client::{FetchConfig, SourceFetcher, decode_availability};
use crate::scan_types::*;
use crate::snapshot_store::{SnapshotStore, load_baseline, stage};

/// Tuning for scan cycles
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum number of requests scanned at once (default: 4)
    pub max_concurrent_requests: usize,

    /// Pause before each request's fetch (default: 100 ms)
    pub request_delay: Duration,

    /// How often the scan manager starts a cycle (default: 15 minutes)
    pub scan_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            request_delay: Duration::from_millis(100),
            scan_interval: Duration::from_secs(15 * 60),
        }
    }
}

/// Applies one request's detected changes to downstream records.
///
/// `changes` names the dates to re-evaluate; a date's payload may be the old
/// unit map when a unit was removed, so availability must be read from
/// `current`. The staged snapshot of a request is promoted only after `apply`
/// succeeds.
#[async_trait]
pub trait ChangeConsumer: Send + Sync {
    /// Apply the changed dates of `req_id`
    async fn apply(
        &self,
        req_id: &str,
        changes: &DateChanges,
        current: &Snapshot,
    ) -> Result<(), ScanError>;
}

/// Result of one scan cycle
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Changes applied downstream and committed, keyed by request id
    pub changes: ChangeSet,
    /// Requests whose staged snapshot became the new baseline
    pub promoted: BTreeSet<String>,
    /// Requests left on their previous baseline, with the reason
    pub held: BTreeMap<String, ScanError>,
}

/// Staged-commit scan engine.
///
/// Each request runs `fetch → decode → diff → stage → consume → promote`.
/// Any failure before promotion leaves the baseline untouched and clears the
/// request's `update` flag, so the next cycle diffs against the same baseline
/// and retries the work that did not complete.
pub struct ScanExecutor {
    fetcher: Arc<dyn SourceFetcher>,
    snapshots: Arc<dyn SnapshotStore>,
    consumer: Arc<dyn ChangeConsumer>,
    fetch_config: FetchConfig,
    config: ScanConfig,
    request_locks: KeyedLocks,
}

impl ScanExecutor {
    /// Create a scan executor
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        snapshots: Arc<dyn SnapshotStore>,
        consumer: Arc<dyn ChangeConsumer>,
        fetch_config: FetchConfig,
        config: Option<ScanConfig>,
    ) -> Self {
        Self {
            fetcher,
            snapshots,
            consumer,
            fetch_config,
            config: config.unwrap_or_default(),
            request_locks: KeyedLocks::new(),
        }
    }

    /// Scan every request once and set each request's `update` flag.
    ///
    /// Requests run in parallel up to `max_concurrent_requests`. Setting the
    /// shutdown signal to `true` fails every request that has not been promoted yet.
    pub async fn run_cycle(
        &self,
        requests: &mut BTreeMap<String, ActiveRequest>,
        shutdown: &watch::Receiver<bool>,
    ) -> ScanReport {
        info!("Starting scan cycle for {} active requests", requests.len());

        let jobs: Vec<ActiveRequest> = requests.values().cloned().collect();
        let concurrency = self.config.max_concurrent_requests.max(1);

        let mut results = stream::iter(jobs)
            .map(|request| {
                let shutdown = shutdown.clone();
                async move {
                    let result = self.scan_request(&request, shutdown).await;
                    (request.req_id, result)
                }
            })
            .buffer_unordered(concurrency);

        let mut report = ScanReport::default();

        while let Some((req_id, result)) = results.next().await {
            match result {
                Ok(changes) => {
                    if !changes.is_empty() {
                        report.changes.insert(req_id.clone(), changes);
                    }
                    report.promoted.insert(req_id);
                }
                Err(e) => {
                    warn!("Holding baseline for {}: {}", req_id, e);
                    report.held.insert(req_id, e);
                }
            }
        }

        for (req_id, request) in requests.iter_mut() {
            request.update = report.promoted.contains(req_id);
        }

        info!(
            "Scan cycle complete: {} promoted, {} held, {} requests changed",
            report.promoted.len(),
            report.held.len(),
            report.changes.len()
        );

        report
    }

    /// Run one request's pipeline under its lock
    async fn scan_request(
        &self,
        request: &ActiveRequest,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DateChanges, ScanError> {
        if *shutdown.borrow() {
            return Err(ScanError::Cancelled);
        }

        if !self.config.request_delay.is_zero() {
            sleep(self.config.request_delay).await;
        }

        let _guard = self.request_locks.acquire(&request.req_id).await;

        let changes = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => return Err(ScanError::Cancelled),
            result = self.stage_and_consume(request) => result?,
        };

        if *shutdown.borrow() {
            return Err(ScanError::Cancelled);
        }

        self.snapshots.promote(&request.req_id).await?;
        debug!("Promoted staged snapshot for {}", request.req_id);

        Ok(changes)
    }

    /// Everything up to (not including) promotion
    async fn stage_and_consume(&self, request: &ActiveRequest) -> Result<DateChanges, ScanError> {
        let req_id = request.req_id.as_str();

        info!("{} request start", req_id);
        let referer = self.fetch_config.referer(&request.campground_id);
        let body = self.fetcher.fetch(&request.url, &referer).await?;
        info!("{} request complete", req_id);

        let current = decode_availability(&body)?;
        let previous = load_baseline(self.snapshots.as_ref(), req_id).await?;

        if previous.is_empty() {
            debug!("No baseline for {}, establishing one", req_id);
        }

        let changes = diff(&previous, &current);

        stage(self.snapshots.as_ref(), req_id, &current).await?;

        if !changes.is_empty() {
            info!("{} dates changed for {}", changes.len(), req_id);
            self.consumer.apply(req_id, &changes, &current).await?;
        }

        Ok(changes)
    }
}

/// Resolves once the shutdown signal is set; never resolves if the sender is gone
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let stopped = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !stopped {
        std::future::pending::<()>().await;
    }
}
