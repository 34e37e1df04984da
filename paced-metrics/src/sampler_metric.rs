use std::collections::HashMap;

use parking_lot::Mutex;

use crate::histogram::sorted_errors;
use crate::outcome::SampleOutcome;
use crate::window::{SlidingWindow, percentile_of_sorted};

/// How response-time windows behave when a reporting interval ends.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum WindowMode {
    /// Bounded windows that keep sliding across intervals; only counters reset.
    #[default]
    Fixed,
    /// Unbounded windows cleared together with the counters at every interval.
    Timed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    pub window_mode: WindowMode,
    /// Capacity of the response-time windows in [`WindowMode::Fixed`].
    pub window_size: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_mode: WindowMode::Fixed,
            window_size: 100,
        }
    }
}

impl MetricsConfig {
    #[must_use]
    pub fn with_window_mode(mut self, mode: WindowMode) -> Self {
        self.window_mode = mode;
        self
    }

    fn new_window(&self) -> SlidingWindow {
        match self.window_mode {
            WindowMode::Fixed => SlidingWindow::bounded(self.window_size),
            WindowMode::Timed => SlidingWindow::unbounded(),
        }
    }
}

/// Failures are grouped by what the sampler reported back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorKey {
    pub response_code: String,
    pub response_message: String,
}

impl ErrorKey {
    pub fn of(outcome: &SampleOutcome) -> Self {
        Self {
            response_code: outcome.response_code.clone(),
            response_message: outcome.response_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl WindowStats {
    fn of(w: &SlidingWindow) -> Self {
        Self {
            count: w.len(),
            min: w.min(),
            max: w.max(),
            mean: w.mean(),
        }
    }
}

/// Point-in-time copy of a [`SamplerMetric`].
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub hits: u64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub ok: WindowStats,
    pub ko: WindowStats,
    pub all: WindowStats,
    /// Failure counts, most frequent first.
    pub errors: Vec<(ErrorKey, u64)>,
    ok_sorted: Vec<f64>,
    ko_sorted: Vec<f64>,
    all_sorted: Vec<f64>,
}

impl MetricSnapshot {
    pub fn count(&self) -> u64 {
        self.successes.saturating_add(self.failures)
    }

    pub fn percentile(&self, p: f64) -> f64 {
        percentile_of_sorted(&self.all_sorted, p)
    }

    /// Percentile of successful samples only.
    pub fn ok_percentile(&self, p: f64) -> f64 {
        percentile_of_sorted(&self.ok_sorted, p)
    }

    /// Percentile of failed samples only.
    pub fn ko_percentile(&self, p: f64) -> f64 {
        percentile_of_sorted(&self.ko_sorted, p)
    }
}

#[derive(Debug)]
struct Inner {
    ok: SlidingWindow,
    ko: SlidingWindow,
    all: SlidingWindow,
    successes: u64,
    failures: u64,
    hits: u64,
    errors: HashMap<ErrorKey, u64>,
    sent_bytes: u64,
    received_bytes: u64,
}

impl Inner {
    fn reset_counters(&mut self) {
        self.errors.clear();
        self.successes = 0;
        self.failures = 0;
        self.hits = 0;
        self.sent_bytes = 0;
        self.received_bytes = 0;
    }
}

/// Per-label response statistics fed by many virtual users at once.
///
/// `add` and `reset_for_time_interval` serialize on one lock per instance.
#[derive(Debug)]
pub struct SamplerMetric {
    mode: WindowMode,
    inner: Mutex<Inner>,
}

impl SamplerMetric {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            mode: config.window_mode,
            inner: Mutex::new(Inner {
                ok: config.new_window(),
                ko: config.new_window(),
                all: config.new_window(),
                successes: 0,
                failures: 0,
                hits: 0,
                errors: HashMap::new(),
                sent_bytes: 0,
                received_bytes: 0,
            }),
        }
    }

    pub fn window_mode(&self) -> WindowMode {
        self.mode
    }

    pub fn add(&self, outcome: &SampleOutcome) {
        self.add_inner(outcome, false);
    }

    /// Adds an outcome to an aggregate spanning several labels.
    ///
    /// Summary-only transaction wrappers contribute timing but neither hits nor
    /// bytes, since their children were already added on their own.
    pub fn add_cumulated(&self, outcome: &SampleOutcome) {
        self.add_inner(outcome, true);
    }

    fn add_inner(&self, outcome: &SampleOutcome, cumulated: bool) {
        let mut inner = self.inner.lock();

        if outcome.success {
            inner.successes = inner.successes.saturating_add(1);
        } else {
            inner.failures = inner.failures.saturating_add(1);
            *inner.errors.entry(ErrorKey::of(outcome)).or_insert(0) += 1;
        }

        let time = outcome.elapsed_ms as f64;
        inner.all.push(time);
        if outcome.success {
            inner.ok.push(time);
        } else {
            inner.ko.push(time);
        }

        if cumulated && outcome.is_summary_only_wrapper() {
            return;
        }
        inner.hits = inner.hits.saturating_add(count_hits(outcome));
        inner.sent_bytes = inner.sent_bytes.saturating_add(outcome.sent_bytes);
        inner.received_bytes = inner.received_bytes.saturating_add(outcome.received_bytes);
    }

    pub fn reset_for_time_interval(&self) {
        let mut inner = self.inner.lock();
        if self.mode == WindowMode::Timed {
            inner.ok.clear();
            inner.ko.clear();
            inner.all.clear();
        }
        inner.reset_counters();
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        let inner = self.inner.lock();
        let errors = sorted_errors(&inner.errors);

        MetricSnapshot {
            successes: inner.successes,
            failures: inner.failures,
            hits: inner.hits,
            sent_bytes: inner.sent_bytes,
            received_bytes: inner.received_bytes,
            ok: WindowStats::of(&inner.ok),
            ko: WindowStats::of(&inner.ko),
            all: WindowStats::of(&inner.all),
            errors,
            ok_sorted: inner.ok.sorted(),
            ko_sorted: inner.ko.sorted(),
            all_sorted: inner.all.sorted(),
        }
    }

    pub fn total(&self) -> u64 {
        let inner = self.inner.lock();
        inner.successes.saturating_add(inner.failures)
    }

    pub fn successes(&self) -> u64 {
        self.inner.lock().successes
    }

    pub fn failures(&self) -> u64 {
        self.inner.lock().failures
    }

    pub fn hits(&self) -> u64 {
        self.inner.lock().hits
    }

    pub fn ok_max_time(&self) -> f64 {
        self.inner.lock().ok.max()
    }

    pub fn ok_min_time(&self) -> f64 {
        self.inner.lock().ok.min()
    }

    pub fn ok_mean(&self) -> f64 {
        self.inner.lock().ok.mean()
    }

    pub fn ko_max_time(&self) -> f64 {
        self.inner.lock().ko.max()
    }

    pub fn all_max_time(&self) -> f64 {
        self.inner.lock().all.max()
    }

    pub fn all_min_time(&self) -> f64 {
        self.inner.lock().all.min()
    }

    pub fn all_mean(&self) -> f64 {
        self.inner.lock().all.mean()
    }

    pub fn all_percentile(&self, p: f64) -> f64 {
        self.inner.lock().all.percentile(p)
    }

    pub fn ok_percentile(&self, p: f64) -> f64 {
        self.inner.lock().ok.percentile(p)
    }

    pub fn ko_percentile(&self, p: f64) -> f64 {
        self.inner.lock().ko.percentile(p)
    }

    pub fn errors(&self) -> HashMap<ErrorKey, u64> {
        self.inner.lock().errors.clone()
    }
}

// Every outcome is a hit, plus its sub-outcomes, except a wrapper that carries
// sub-outcomes: only those count.
pub(crate) fn count_hits(outcome: &SampleOutcome) -> u64 {
    let sub: u64 = outcome.sub_outcomes.iter().map(count_hits).sum();
    if outcome.is_transaction_wrapper && !outcome.sub_outcomes.is_empty() {
        return sub;
    }
    sub.saturating_add(1)
}
