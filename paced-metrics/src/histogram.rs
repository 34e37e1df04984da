use std::collections::HashMap;

use hdrhistogram::Histogram;

use crate::MetricsError;
use crate::agg::RunningStats;
use crate::outcome::SampleOutcome;
use crate::sampler_metric::ErrorKey;

/// Upper bound for recorded response times: one hour in milliseconds.
const MAX_TRACKED_MS: u64 = 3_600_000;

pub(crate) fn new_latency_histogram() -> Result<Histogram<u64>, MetricsError> {
    Ok(Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_MS, 3)?)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySummary {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub count: u64,
}

/// Whole-run totals for one label, never reset between reporting intervals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSummary {
    pub label: String,
    pub samples: u64,
    pub failures: u64,
    pub hits: u64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub latency_ms: LatencySummary,
    /// Failure counts over the whole run, most frequent first.
    pub errors: Vec<(ErrorKey, u64)>,
}

impl LabelSummary {
    pub fn error_rate(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.failures as f64 / self.samples as f64
    }
}

/// Cumulative response-time distribution backing [`LabelSummary`].
#[derive(Debug)]
pub struct CumulativeStats {
    histogram: Histogram<u64>,
    running: RunningStats,
    samples: u64,
    failures: u64,
    hits: u64,
    sent_bytes: u64,
    received_bytes: u64,
    errors: HashMap<ErrorKey, u64>,
}

impl CumulativeStats {
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self::from_histogram(new_latency_histogram()?))
    }

    pub(crate) fn from_histogram(histogram: Histogram<u64>) -> Self {
        Self {
            histogram,
            running: RunningStats::default(),
            samples: 0,
            failures: 0,
            hits: 0,
            sent_bytes: 0,
            received_bytes: 0,
            errors: HashMap::new(),
        }
    }

    pub fn record(&mut self, outcome: &SampleOutcome, hits: u64) {
        self.histogram.saturating_record(outcome.elapsed_ms);
        self.running.push(outcome.elapsed_ms as f64);
        self.samples = self.samples.saturating_add(1);
        if !outcome.success {
            self.failures = self.failures.saturating_add(1);
            *self.errors.entry(ErrorKey::of(outcome)).or_insert(0) += 1;
        }
        self.hits = self.hits.saturating_add(hits);
        self.sent_bytes = self.sent_bytes.saturating_add(outcome.sent_bytes);
        self.received_bytes = self.received_bytes.saturating_add(outcome.received_bytes);
    }

    pub fn summarize(&self, label: &str) -> LabelSummary {
        LabelSummary {
            label: label.to_string(),
            samples: self.samples,
            failures: self.failures,
            hits: self.hits,
            sent_bytes: self.sent_bytes,
            received_bytes: self.received_bytes,
            latency_ms: summarize_histogram(&self.histogram, &self.running),
            errors: sorted_errors(&self.errors),
        }
    }
}

pub(crate) fn sorted_errors(errors: &HashMap<ErrorKey, u64>) -> Vec<(ErrorKey, u64)> {
    let mut out: Vec<(ErrorKey, u64)> = errors.iter().map(|(k, v)| (k.clone(), *v)).collect();
    out.sort_by(|(ak, av), (bk, bv)| bv.cmp(av).then_with(|| ak.cmp(bk)));
    out
}

fn summarize_histogram(h: &Histogram<u64>, running: &RunningStats) -> LatencySummary {
    let count = h.len();
    let some = count > 0;
    let at = |q: f64| some.then(|| h.value_at_quantile(q) as f64);

    LatencySummary {
        p50: at(0.50),
        p90: at(0.90),
        p95: at(0.95),
        p99: at(0.99),
        min: some.then(|| h.min() as f64),
        max: some.then(|| h.max() as f64),
        mean: some.then(|| running.mean()),
        stdev: some.then(|| running.stdev()),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_empty_stats_has_no_latency() {
        let stats = CumulativeStats::new().unwrap_or_else(|e| panic!("{e}"));
        let s = stats.summarize("empty");
        assert_eq!(s.samples, 0);
        assert_eq!(s.latency_ms.p50, None);
        assert_eq!(s.error_rate(), 0.0);
    }

    #[test]
    fn records_failures_and_latency() {
        let mut stats = CumulativeStats::new().unwrap_or_else(|e| panic!("{e}"));
        stats.record(&SampleOutcome::success("a", 10), 1);
        stats.record(&SampleOutcome::success("a", 30), 1);
        stats.record(&SampleOutcome::failure("a", 20, "500", "boom"), 1);

        let s = stats.summarize("a");
        assert_eq!(s.samples, 3);
        assert_eq!(s.failures, 1);
        assert_eq!(s.hits, 3);
        assert_eq!(s.latency_ms.min, Some(10.0));
        assert_eq!(s.latency_ms.max, Some(30.0));
        assert!((s.latency_ms.mean.unwrap_or_default() - 20.0).abs() < 1e-9);
        assert!((s.error_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.errors.len(), 1);
        assert_eq!(s.errors[0].0.response_code, "500");
    }

    #[test]
    fn oversized_latency_is_clamped() {
        let mut stats = CumulativeStats::new().unwrap_or_else(|e| panic!("{e}"));
        stats.record(&SampleOutcome::success("a", MAX_TRACKED_MS * 10), 1);
        let s = stats.summarize("a");
        assert_eq!(s.latency_ms.count, 1);
    }
}
