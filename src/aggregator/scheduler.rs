use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::persister::{persist, PersistSummary};
use crate::feed::{fetch_feed, parse_feed, FetchError, ParseError};
use crate::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::storage::{Database, DatabaseError, Feed};

/// Default time between ticks
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
/// Default bound on a single fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on concurrent workers
pub const MAX_WORKERS: usize = 16;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("fetch interval must be greater than zero")]
    ZeroInterval,
    #[error("fetch timeout must be greater than zero")]
    ZeroTimeout,
    #[error("worker count must be between 1 and {MAX_WORKERS}, got {0}")]
    WorkerCount(usize),
}

/// Validated loop configuration. Built once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    interval: Duration,
    fetch_timeout: Duration,
    workers: usize,
}

impl AggregatorSettings {
    pub fn new(
        interval: Duration,
        fetch_timeout: Duration,
        workers: usize,
    ) -> Result<Self, SettingsError> {
        if interval.is_zero() {
            return Err(SettingsError::ZeroInterval);
        }
        if fetch_timeout.is_zero() {
            return Err(SettingsError::ZeroTimeout);
        }
        if workers == 0 || workers > MAX_WORKERS {
            return Err(SettingsError::WorkerCount(workers));
        }
        Ok(Self {
            interval,
            fetch_timeout,
            workers,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            workers: 1,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why a single feed could not be aggregated this tick.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl AggregateError {
    /// Short stable label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AggregateError::Fetch(e) => e.kind(),
            AggregateError::Parse(_) => "parse",
            AggregateError::Store(_) => "store",
        }
    }
}

/// What one cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No feeds are registered
    NoFeeds,
    /// The store could not produce a feed to poll
    SelectionFailed(DatabaseError),
    Fetched {
        feed_id: i64,
        summary: PersistSummary,
    },
    /// The feed was stamped fetched despite the failure
    Failed {
        feed_id: i64,
        error: AggregateError,
    },
    /// Shutdown interrupted the fetch; the feed was not stamped
    Cancelled { feed_id: i64 },
}

/// Observable loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    FetchingOne,
    Stopped,
}

/// How a cycle picks its feed.
#[derive(Debug, Clone, Copy)]
enum Selection {
    /// Read the oldest feed; the stamp happens after processing
    Oldest,
    /// Select and stamp in one statement, safe across concurrent workers
    Claim,
}

// ============================================================================
// Aggregator
// ============================================================================

/// The aggregation engine: pick a feed, fetch, parse, persist.
///
/// Holds no feed or post state between cycles; every cycle re-reads
/// selection state from the store.
#[derive(Clone)]
pub struct Aggregator {
    db: Database,
    client: reqwest::Client,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(db: Database, client: reqwest::Client, settings: AggregatorSettings) -> Self {
        Self {
            db,
            client,
            settings,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Run one cycle now: poll the least recently fetched feed.
    ///
    /// Failures are logged and returned in the outcome, never raised.
    pub async fn run_cycle(&self, shutdown: &mut ShutdownSignal) -> CycleOutcome {
        self.cycle(Selection::Oldest, shutdown).await
    }

    async fn cycle(&self, selection: Selection, shutdown: &mut ShutdownSignal) -> CycleOutcome {
        let started_at = Utc::now();

        let next = match selection {
            Selection::Oldest => self.db.select_feed_for_fetch().await,
            Selection::Claim => self.db.claim_feed_for_fetch(started_at).await,
        };
        let feed = match next {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                tracing::debug!("No feeds registered, nothing to fetch");
                return CycleOutcome::NoFeeds;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to select next feed");
                return CycleOutcome::SelectionFailed(e);
            }
        };

        tracing::debug!(feed_id = feed.id, url = %feed.url, "Fetching feed");

        match self.process(&feed, started_at, shutdown).await {
            Ok(summary) => {
                tracing::info!(
                    feed_id = feed.id,
                    feed = %feed.name,
                    inserted = summary.inserted,
                    skipped = summary.skipped,
                    "Feed aggregated"
                );
                CycleOutcome::Fetched {
                    feed_id: feed.id,
                    summary,
                }
            }
            Err(AggregateError::Fetch(FetchError::Cancelled)) => {
                tracing::info!(feed_id = feed.id, "Fetch cancelled by shutdown");
                CycleOutcome::Cancelled { feed_id: feed.id }
            }
            Err(error) => {
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    kind = error.kind(),
                    error = %error,
                    "Feed aggregation failed"
                );
                // A broken feed still moves to the back of the rotation
                if let Err(e) = self.db.mark_feed_fetched(feed.id, started_at).await {
                    tracing::warn!(feed_id = feed.id, error = %e, "Failed to mark feed fetched");
                }
                CycleOutcome::Failed {
                    feed_id: feed.id,
                    error,
                }
            }
        }
    }

    async fn process(
        &self,
        feed: &Feed,
        started_at: DateTime<Utc>,
        shutdown: &mut ShutdownSignal,
    ) -> Result<PersistSummary, AggregateError> {
        let bytes = fetch_feed(
            &self.client,
            &feed.url,
            self.settings.fetch_timeout,
            shutdown,
        )
        .await?;

        let parsed = parse_feed(&bytes)?;
        tracing::debug!(
            feed_id = feed.id,
            title = %parsed.title,
            items = parsed.items.len(),
            "Parsed feed"
        );

        // Not raced against shutdown: a started persist always completes
        Ok(persist(&self.db, feed.id, &parsed.items, started_at).await?)
    }

    /// Start the loop on the tokio runtime.
    ///
    /// The first tick fires immediately, then one every interval. With more
    /// than one worker each runs its own loop and feeds are claimed
    /// atomically in the store. Dropping the handle stops every worker.
    pub fn spawn(self) -> AggregatorHandle {
        let (trigger, signal) = shutdown::channel();
        let selection = if self.settings.workers > 1 {
            Selection::Claim
        } else {
            Selection::Oldest
        };

        tracing::info!(
            interval_secs = self.settings.interval.as_secs_f64(),
            timeout_secs = self.settings.fetch_timeout.as_secs_f64(),
            workers = self.settings.workers,
            "Starting aggregation"
        );

        let mut workers = Vec::with_capacity(self.settings.workers);
        let mut states = Vec::with_capacity(self.settings.workers);
        for worker in 0..self.settings.workers {
            let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
            let aggregator = self.clone();
            let signal = signal.clone();
            workers.push(tokio::spawn(async move {
                aggregator.run_worker(worker, selection, signal, state_tx).await;
            }));
            states.push(state_rx);
        }

        AggregatorHandle {
            trigger,
            workers,
            states,
        }
    }

    async fn run_worker(
        self,
        worker: usize,
        selection: Selection,
        mut shutdown: ShutdownSignal,
        state: watch::Sender<SchedulerState>,
    ) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            state.send_replace(SchedulerState::FetchingOne);
            self.cycle(selection, &mut shutdown).await;
            state.send_replace(SchedulerState::Idle);
        }

        state.send_replace(SchedulerState::Stopped);
        tracing::debug!(worker = worker, "Aggregation worker stopped");
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Running loop. `stop` is the only way to end it besides dropping the handle.
pub struct AggregatorHandle {
    trigger: ShutdownTrigger,
    workers: Vec<JoinHandle<()>>,
    states: Vec<watch::Receiver<SchedulerState>>,
}

impl AggregatorHandle {
    /// `FetchingOne` if any worker is mid-cycle, `Stopped` once all have exited.
    pub fn state(&self) -> SchedulerState {
        let current: Vec<SchedulerState> = self.states.iter().map(|rx| *rx.borrow()).collect();
        if current.iter().all(|s| *s == SchedulerState::Stopped) {
            SchedulerState::Stopped
        } else if current.contains(&SchedulerState::FetchingOne) {
            SchedulerState::FetchingOne
        } else {
            SchedulerState::Idle
        }
    }

    /// A signal that fires when this loop is told to stop
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.trigger.signal()
    }

    /// Stop ticking, cancel in-flight fetches, and wait for every worker.
    ///
    /// Persists already under way finish before this returns.
    pub async fn stop(self) {
        self.trigger.trigger();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Aggregation worker panicked");
            }
        }
        tracing::info!("Aggregation stopped");
    }
}
