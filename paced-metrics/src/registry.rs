use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::MetricsError;
use crate::histogram::{CumulativeStats, LabelSummary, new_latency_histogram};
use crate::outcome::SampleOutcome;
use crate::sampler_metric::{MetricSnapshot, MetricsConfig, SamplerMetric, count_hits};

/// Label of the aggregate fed by every recorded outcome.
pub const ALL_LABEL: &str = "all";

#[derive(Debug)]
struct LabelEntry {
    window: SamplerMetric,
    cumulative: Mutex<CumulativeStats>,
}

impl LabelEntry {
    fn new(config: MetricsConfig, proto: &Histogram<u64>) -> Self {
        Self {
            window: SamplerMetric::new(config),
            cumulative: Mutex::new(CumulativeStats::from_histogram(proto.clone())),
        }
    }
}

/// Label-keyed [`SamplerMetric`]s plus whole-run summaries, shared by all users.
#[derive(Debug)]
pub struct MetricsRegistry {
    config: MetricsConfig,
    proto: Histogram<u64>,
    labels: DashMap<Arc<str>, Arc<LabelEntry>, RandomState>,
    all: LabelEntry,
}

impl MetricsRegistry {
    pub fn new(config: MetricsConfig) -> Result<Self, MetricsError> {
        let proto = new_latency_histogram()?;
        let all = LabelEntry::new(config, &proto);
        Ok(Self {
            config,
            proto,
            labels: DashMap::with_hasher(RandomState::new()),
            all,
        })
    }

    pub fn config(&self) -> MetricsConfig {
        self.config
    }

    pub fn add(&self, outcome: &SampleOutcome) {
        let entry = self.entry(&outcome.label);
        entry.window.add(outcome);
        entry.cumulative.lock().record(outcome, count_hits(outcome));

        self.all.window.add_cumulated(outcome);
        let all_hits = if outcome.is_summary_only_wrapper() {
            0
        } else {
            count_hits(outcome)
        };
        self.all.cumulative.lock().record(outcome, all_hits);
    }

    fn entry(&self, label: &Arc<str>) -> Arc<LabelEntry> {
        if let Some(e) = self.labels.get(label) {
            return e.value().clone();
        }
        self.labels
            .entry(label.clone())
            .or_insert_with(|| Arc::new(LabelEntry::new(self.config, &self.proto)))
            .value()
            .clone()
    }

    /// Interval snapshot for `label`; [`ALL_LABEL`] selects the aggregate.
    pub fn snapshot(&self, label: &str) -> Option<MetricSnapshot> {
        if label == ALL_LABEL {
            return Some(self.all.window.snapshot());
        }
        self.labels.get(label).map(|e| e.window.snapshot())
    }

    pub fn all_snapshot(&self) -> MetricSnapshot {
        self.all.window.snapshot()
    }

    /// Recorded labels, sorted.
    pub fn labels(&self) -> Vec<Arc<str>> {
        let mut out: Vec<Arc<str>> = self.labels.iter().map(|e| e.key().clone()).collect();
        out.sort();
        out
    }

    /// Ends the current reporting interval on every metric.
    pub fn reset_interval(&self) {
        for e in self.labels.iter() {
            e.window.reset_for_time_interval();
        }
        self.all.window.reset_for_time_interval();
    }

    /// Whole-run summaries per label, sorted by label, followed by the aggregate.
    pub fn summaries(&self) -> Vec<LabelSummary> {
        let mut out: Vec<LabelSummary> = self
            .labels
            .iter()
            .map(|e| e.value().cumulative.lock().summarize(e.key()))
            .collect();
        out.sort_by(|a, b| a.label.cmp(&b.label));
        out.push(self.all.cumulative.lock().summarize(ALL_LABEL));
        out
    }
}
