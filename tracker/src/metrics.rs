//! Autorefresh metrics.

use std::collections::VecDeque;
use std::time::Duration;

/// Outcome counters and latency samples of watched refreshes.
#[derive(Debug, Clone)]
pub struct RefreshMetrics {
    /// Refreshes observed.
    pub total_refreshes: u64,
    /// Successful refreshes.
    pub successful_refreshes: u64,
    /// Failed refreshes.
    pub failed_refreshes: u64,
    /// Runs started, including restarts.
    pub runs: u64,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl RefreshMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_refreshes: 0,
            successful_refreshes: 0,
            failed_refreshes: 0,
            runs: 0,
            latency_samples: VecDeque::with_capacity(1024),
            max_samples: 1024,
        }
    }

    /// Record the start of a run.
    pub fn record_run(&mut self) {
        self.runs += 1;
    }

    /// Record a successful refresh.
    pub fn record_success(&mut self, latency: Duration) {
        self.total_refreshes += 1;
        self.successful_refreshes += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples
            .push_back(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
    }

    /// Record a failed refresh.
    pub fn record_failure(&mut self) {
        self.total_refreshes += 1;
        self.failed_refreshes += 1;
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_refreshes == 0 {
            return 0.0;
        }

        self.successful_refreshes as f64 / self.total_refreshes as f64
    }
}

impl Default for RefreshMetrics {
    fn default() -> Self {
        Self::new()
    }
}
