//! Watch mode controller.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{info, warn};

use fxtracker_fx::{FxTracker, RefreshState};

use crate::metrics::RefreshMetrics;
use crate::output::{render_rates, render_state};

/// Drives the autorefresh and prints every change until stopped.
pub struct WatchController {
    tracker: Arc<FxTracker>,
    /// Restart a failed run after one refresh period.
    restart_on_failure: bool,
    metrics: RefreshMetrics,
}

impl WatchController {
    /// Create a new watch controller.
    pub fn new(tracker: Arc<FxTracker>, restart_on_failure: bool) -> Self {
        Self {
            tracker,
            restart_on_failure,
            metrics: RefreshMetrics::new(),
        }
    }

    /// Watch until `duration` elapses or `shutdown` completes.
    ///
    /// Fails when a run fails and restarts are disabled.
    pub async fn run<W, S>(
        &mut self,
        out: &mut W,
        duration: Option<Duration>,
        shutdown: S,
    ) -> anyhow::Result<()>
    where
        W: Write,
        S: Future<Output = ()>,
    {
        let period = self.tracker.autorefresh().period();
        let driver = self.tracker.driver();
        let mut states = driver.subscribe();
        let mut rates = Box::pin(self.tracker.projection().observe_selected_rates());

        let deadline = duration.map(|d| Instant::now() + d);
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);
        tokio::pin!(shutdown);

        info!(period = ?period, "Watching selected rates");
        let mut generation = driver.start();
        self.metrics.record_run();
        let mut refresh_started = Instant::now();
        let mut retry_at: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = &mut expired => {
                    info!("Watch duration elapsed");
                    break;
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    generation = driver.restart();
                    self.metrics.record_run();
                    refresh_started = Instant::now();
                    info!(generation, "Autorefresh restarted");
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    if state.generation != generation {
                        continue;
                    }
                    writeln!(out, "{}", render_state(&state))?;

                    match &state.state {
                        RefreshState::Stale => {}
                        RefreshState::Running { .. } => {
                            let now = Instant::now();
                            self.metrics
                                .record_success(now.saturating_duration_since(refresh_started));
                            refresh_started = now + period;
                        }
                        RefreshState::Failed { error } => {
                            self.metrics.record_failure();
                            if !self.restart_on_failure {
                                driver.stop();
                                return Err(anyhow::anyhow!("Autorefresh failed: {}", error));
                            }
                            warn!(error = %error, retry_in = ?period, "Autorefresh failed, will restart");
                            retry_at = Some(Instant::now() + period);
                        }
                    }
                }
                Some(projected) = rates.next() => {
                    for line in render_rates(&projected) {
                        writeln!(out, "{}", line)?;
                    }
                }
            }
        }

        driver.stop();
        Ok(())
    }

    /// Get the metrics collected so far.
    pub fn metrics(&self) -> &RefreshMetrics {
        &self.metrics
    }
}
