//! Drives the fetch → normalize → install cycle.
//!
//! At most one cycle runs at a time: a trigger that arrives while a fetch is
//! outstanding returns [`RefreshOutcome::Coalesced`] without touching the
//! network. A failed cycle never replaces the installed snapshot.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, RefreshFailure};
use crate::fetch::FeedSource;
use crate::normalize::normalize_feed;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::stats::FeedStats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    #[default]
    Idle,
    Fetching,
}

/// Observability view of the scheduler. Counters do not change cadence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub consecutive_failures: u64,
    pub total_failures: u64,
    pub successful_refreshes: u64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<FailureKind>,
    pub last_stats: Option<FeedStats>,
}

#[derive(Debug)]
pub enum RefreshOutcome {
    /// Another cycle was already in flight; nothing was fetched.
    Coalesced,
    Success(Arc<Snapshot>),
    Failed(RefreshFailure),
}

pub struct RefreshScheduler {
    source: Arc<dyn FeedSource>,
    store: SnapshotStore,
    in_flight: AtomicBool,
    status: watch::Sender<RefreshStatus>,
}

impl RefreshScheduler {
    pub fn new(source: Arc<dyn FeedSource>, store: SnapshotStore) -> Self {
        let (status, _) = watch::channel(RefreshStatus::default());
        Self {
            source,
            store,
            in_flight: AtomicBool::new(false),
            status,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.borrow().clone()
    }

    /// Runs one cycle unless one is already running.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_gate) = FetchGate::try_begin(&self.in_flight, &self.status) else {
            debug!("Refresh already in flight, coalescing");
            return RefreshOutcome::Coalesced;
        };

        let fetched_at = Utc::now();
        self.status.send_modify(|s| {
            s.state = RefreshState::Fetching;
            s.last_attempt_at = Some(fetched_at);
        });

        match self.cycle(fetched_at).await {
            Ok((snapshot, stats)) => {
                info!(
                    generation = snapshot.generation,
                    vehicles = snapshot.positions.len(),
                    skipped = stats.vehicles - stats.accepted,
                    approximate_timestamps = stats.approximate_timestamps,
                    "Snapshot installed"
                );
                self.status.send_modify(|s| {
                    s.consecutive_failures = 0;
                    s.successful_refreshes += 1;
                    s.last_success_at = Some(fetched_at);
                    s.last_stats = Some(stats);
                });
                RefreshOutcome::Success(snapshot)
            }
            Err((failure, stats)) => {
                let mut consecutive = 0;
                self.status.send_modify(|s| {
                    s.consecutive_failures += 1;
                    s.total_failures += 1;
                    s.last_error = Some(failure.to_string());
                    s.last_error_kind = Some(failure.kind());
                    if stats.is_some() {
                        s.last_stats = stats;
                    }
                    consecutive = s.consecutive_failures;
                });
                match failure {
                    RefreshFailure::DataQuality { .. } => {
                        warn!(error = %failure, consecutive, "Refresh yielded no positions, keeping previous snapshot");
                    }
                    RefreshFailure::Fetch(_) => {
                        error!(error = %failure, consecutive, "Refresh failed, keeping previous snapshot");
                    }
                }
                RefreshOutcome::Failed(failure)
            }
        }
    }

    async fn cycle(
        &self,
        fetched_at: DateTime<Utc>,
    ) -> Result<(Arc<Snapshot>, FeedStats), (RefreshFailure, Option<FeedStats>)> {
        let feed = self
            .source
            .fetch()
            .await
            .map_err(|e| (RefreshFailure::from(e), None))?;

        let (positions, stats) = normalize_feed(&feed, fetched_at);
        if stats.is_zero_yield() {
            let failure = RefreshFailure::DataQuality {
                entities: stats.total_entities,
            };
            return Err((failure, Some(stats)));
        }

        Ok((self.store.replace(positions, fetched_at), stats))
    }

    /// Triggers [`refresh`](Self::refresh) every `interval` until `shutdown`
    /// resolves. The first tick fires immediately.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs_f64(), "Refresh scheduler started");
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.refresh().await;
                    });
                }
            }
        }
        info!("Refresh scheduler stopped");
    }
}

/// Held for the duration of one cycle. Dropping it, even on cancellation,
/// returns the scheduler to `Idle` and reopens the gate.
struct FetchGate<'a> {
    in_flight: &'a AtomicBool,
    status: &'a watch::Sender<RefreshStatus>,
}

impl<'a> FetchGate<'a> {
    fn try_begin(
        in_flight: &'a AtomicBool,
        status: &'a watch::Sender<RefreshStatus>,
    ) -> Option<Self> {
        in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { in_flight, status })
    }
}

impl Drop for FetchGate<'_> {
    fn drop(&mut self) {
        self.status.send_modify(|s| s.state = RefreshState::Idle);
        self.in_flight.store(false, Ordering::Release);
    }
}
