//! Run-wide outcome aggregation shared by every worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;
use tokio::time::Instant;

/// Highest latency tracked by the histogram, in microseconds.
const MAX_TRACKED_LATENCY_US: u64 = 3_600_000_000;

/// Outcome of one named check in one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: Arc<str>,
    pub passed: bool,
}

impl CheckResult {
    pub fn new(name: impl Into<Arc<str>>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// Request latency statistics in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub duration_secs: f64,
    pub iterations: u64,
    pub requests: u64,
    pub transport_errors: u64,
    pub bytes_received: u64,
    pub vus_started: u64,
    pub vus_stopped: u64,
    pub peak_vus: usize,
    pub checks: Vec<CheckSummary>,
    pub latency: LatencySummary,
}

impl RunSummary {
    pub fn check(&self, name: &str) -> Option<&CheckSummary> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn checks_passed(&self) -> u64 {
        self.checks.iter().map(|c| c.passes).sum()
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks.iter().map(|c| c.fails).sum()
    }

    pub fn iterations_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.iterations as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Thread-safe counters for the whole run. Counters are atomics; check
/// tallies and the latency histogram sit behind short-lived mutexes.
#[derive(Debug)]
pub struct Aggregator {
    started: Mutex<Instant>,
    checks: Mutex<BTreeMap<Arc<str>, CheckTally>>,
    latency_us: Mutex<Histogram<u64>>,
    iterations: AtomicU64,
    requests: AtomicU64,
    transport_errors: AtomicU64,
    bytes_received: AtomicU64,
    vus_started: AtomicU64,
    vus_stopped: AtomicU64,
    active_vus: AtomicUsize,
    peak_vus: AtomicUsize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            started: Mutex::new(Instant::now()),
            checks: Mutex::new(BTreeMap::new()),
            latency_us: Mutex::new(
                Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)
                    .expect("static histogram bounds are valid"),
            ),
            iterations: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            vus_started: AtomicU64::new(0),
            vus_stopped: AtomicU64::new(0),
            active_vus: AtomicUsize::new(0),
            peak_vus: AtomicUsize::new(0),
        }
    }

    /// Restarts the run clock behind `duration_secs`. Called when the run
    /// actually begins, which may be well after construction.
    pub fn start_clock(&self) {
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn record(&self, result: CheckResult) {
        let mut checks = self.checks.lock().unwrap_or_else(PoisonError::into_inner);
        let tally = checks.entry(result.name).or_default();
        if result.passed {
            tally.passes += 1;
        } else {
            tally.fails += 1;
        }
    }

    /// A request that produced a response, successful or not.
    pub fn record_request(&self, latency: Duration, bytes: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);

        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX).max(1);
        self.latency_us
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .saturating_record(micros);
    }

    pub fn record_transport_error(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vu_started(&self) {
        self.vus_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vu_stopped(&self) {
        self.vus_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_vus(&self, active: usize) {
        self.active_vus.store(active, Ordering::Relaxed);
        self.peak_vus.fetch_max(active, Ordering::Relaxed);
    }

    pub fn active_vus(&self) -> usize {
        self.active_vus.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn tally(&self, name: &str) -> CheckTally {
        self.checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Snapshot of everything recorded so far.
    pub fn summary(&self) -> RunSummary {
        let checks = self
            .checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, tally)| CheckSummary {
                name: name.to_string(),
                passes: tally.passes,
                fails: tally.fails,
            })
            .collect();

        let latency = {
            let hist = self.latency_us.lock().unwrap_or_else(PoisonError::into_inner);
            latency_summary(&hist)
        };

        RunSummary {
            duration_secs: self
                .started
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed()
                .as_secs_f64(),
            iterations: self.iterations.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            vus_started: self.vus_started.load(Ordering::Relaxed),
            vus_stopped: self.vus_stopped.load(Ordering::Relaxed),
            peak_vus: self.peak_vus.load(Ordering::Relaxed),
            checks,
            latency,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn latency_summary(hist: &Histogram<u64>) -> LatencySummary {
    if hist.is_empty() {
        return LatencySummary::default();
    }

    let ms = |us: u64| us as f64 / 1000.0;
    LatencySummary {
        count: hist.len(),
        min: ms(hist.min()),
        mean: hist.mean() / 1000.0,
        p50: ms(hist.value_at_quantile(0.50)),
        p90: ms(hist.value_at_quantile(0.90)),
        p95: ms(hist.value_at_quantile(0.95)),
        p99: ms(hist.value_at_quantile(0.99)),
        max: ms(hist.max()),
    }
}
