//! Periodic refresh of the rates of the selected assets.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;
use fxtracker_common::Timestamp;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::RateCache;
use crate::error::{FxError, FxResult};
use crate::selection::SelectionStore;

/// State of an autorefresh run.
#[derive(Debug, Clone)]
pub enum RefreshState {
    /// No refresh attempted yet.
    Stale,
    /// Last refresh succeeded.
    Running { refreshed_at: Timestamp },
    /// A refresh failed. The run is over.
    Failed { error: Arc<FxError> },
}

impl RefreshState {
    pub fn is_failed(&self) -> bool {
        matches!(self, RefreshState::Failed { .. })
    }

    /// Check if no further state follows in the same run.
    pub fn is_terminal(&self) -> bool {
        self.is_failed()
    }
}

impl PartialEq for RefreshState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RefreshState::Stale, RefreshState::Stale) => true,
            (
                RefreshState::Running { refreshed_at: a },
                RefreshState::Running { refreshed_at: b },
            ) => a == b,
            (RefreshState::Failed { error: a }, RefreshState::Failed { error: b }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for RefreshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshState::Stale => write!(f, "stale"),
            RefreshState::Running { refreshed_at } => {
                write!(f, "refreshed at {}", refreshed_at.to_rfc3339())
            }
            RefreshState::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Autorefresh of the selected assets' rates.
pub struct AutorefreshSelectedRates {
    selection: Arc<SelectionStore>,
    rates: Arc<RateCache>,
    period: Duration,
}

impl AutorefreshSelectedRates {
    /// Create a new autorefresh with the given period.
    pub fn new(selection: Arc<SelectionStore>, rates: Arc<RateCache>, period: Duration) -> Self {
        Self {
            selection,
            rates,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start a run.
    ///
    /// Emits `Stale`, then `Running` after every successful refresh of the
    /// selection. The first failure is emitted as `Failed` and ends the
    /// stream. Dropping the stream stops the run at its next suspension
    /// point.
    pub fn stream(&self) -> impl Stream<Item = RefreshState> + Send + 'static {
        let run = Run {
            id: Uuid::now_v7(),
            iteration: 0,
            selection: self.selection.clone(),
            rates: self.rates.clone(),
            period: self.period,
        };
        debug!(run = %run.id, period = ?run.period, "Autorefresh run created");

        stream::unfold((Step::Start, run), |(step, mut run)| async move {
            match step {
                Step::Start => return Some((RefreshState::Stale, (Step::Refresh, run))),
                Step::Done => return None,
                Step::Refresh => {}
                Step::Wait => tokio::time::sleep(run.period).await,
            }

            match run.iterate().await {
                Ok(()) => {
                    let state = RefreshState::Running {
                        refreshed_at: fxtracker_common::now(),
                    };
                    Some((state, (Step::Wait, run)))
                }
                Err(e) => {
                    warn!(
                        run = %run.id,
                        iteration = run.iteration,
                        error = %e,
                        "Autorefresh failed"
                    );
                    let state = RefreshState::Failed { error: Arc::new(e) };
                    Some((state, (Step::Done, run)))
                }
            }
        })
    }
}

enum Step {
    Start,
    Refresh,
    Wait,
    Done,
}

struct Run {
    id: Uuid,
    iteration: u64,
    selection: Arc<SelectionStore>,
    rates: Arc<RateCache>,
    period: Duration,
}

impl Run {
    async fn iterate(&mut self) -> FxResult<()> {
        self.iteration += 1;

        let refresh = async {
            let codes = self.selection.get()?;
            self.rates.refresh(&codes).await
        };

        match AssertUnwindSafe(refresh).catch_unwind().await {
            Ok(Ok(rates)) => {
                debug!(
                    run = %self.id,
                    iteration = self.iteration,
                    count = rates.len(),
                    "Autorefresh iteration done"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(panic) => Err(FxError::Unexpected(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "refresh panicked".to_string()
    }
}

/// Latest state published by an [`AutorefreshDriver`].
#[derive(Debug, Clone, PartialEq)]
pub struct DriverState {
    /// Run that produced `state`. 0 before the first run.
    pub generation: u64,
    pub state: RefreshState,
}

/// Owns at most one autorefresh run and publishes its latest state.
pub struct AutorefreshDriver {
    autorefresh: Arc<AutorefreshSelectedRates>,
    state_tx: Arc<watch::Sender<DriverState>>,
    task: Mutex<Option<JoinHandle<()>>>,
    generation: Arc<AtomicU64>,
}

impl AutorefreshDriver {
    pub fn new(autorefresh: Arc<AutorefreshSelectedRates>) -> Self {
        let (state_tx, _) = watch::channel(DriverState {
            generation: 0,
            state: RefreshState::Stale,
        });
        Self {
            autorefresh,
            state_tx: Arc::new(state_tx),
            task: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a run unless one is active. Returns the active generation.
    pub fn start(&self) -> u64 {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return self.generation.load(Ordering::SeqCst);
        }
        self.spawn_run(&mut task)
    }

    /// Abort the current run, if any, and start a fresh one from `Stale`.
    pub fn restart(&self) -> u64 {
        let mut task = self.task.lock();
        self.spawn_run(&mut task)
    }

    /// Replace the run in `task`. Callers hold the task lock.
    fn spawn_run(&self, task: &mut Option<JoinHandle<()>>) -> u64 {
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state_tx.send_replace(DriverState {
            generation,
            state: RefreshState::Stale,
        });

        let mut states = Box::pin(self.autorefresh.stream());
        let state_tx = self.state_tx.clone();
        let current = self.generation.clone();

        let handle = tokio::spawn(
            async move {
                info!("Autorefresh started");
                while let Some(state) = states.next().await {
                    if current.load(Ordering::SeqCst) != generation {
                        break;
                    }
                    let mut superseded = false;
                    state_tx.send_if_modified(|latest| {
                        if latest.generation != generation {
                            superseded = true;
                            return false;
                        }
                        // The run's opening `Stale` was published by `restart`.
                        if matches!(
                            (&latest.state, &state),
                            (RefreshState::Stale, RefreshState::Stale)
                        ) {
                            return false;
                        }
                        latest.state = state.clone();
                        true
                    });
                    if superseded {
                        break;
                    }
                }
                info!("Autorefresh finished");
            }
            .instrument(info_span!("autorefresh", generation)),
        );

        *task = Some(handle);
        generation
    }

    /// Abort the current run. The last published state is kept.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            self.generation.fetch_add(1, Ordering::SeqCst);
            debug!("Autorefresh stopped");
        }
    }

    /// Check if a run is active.
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Get the latest state.
    pub fn state(&self) -> DriverState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<DriverState> {
        self.state_tx.subscribe()
    }
}

impl Drop for AutorefreshDriver {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
