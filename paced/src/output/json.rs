use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use paced_core::metrics::{ErrorKey, LabelSummary, MetricSnapshot, per_sec};
use paced_core::{ProgressUpdate, RunSummary};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _plan: &paced_core::TestPlan) {}

    fn progress(&self) -> Option<paced_core::ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let line = build_summary_line(summary);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub interval_secs: f64,
    pub active_threads: u64,
    pub samples_per_sec: f64,
    pub samples: u64,
    pub failures: u64,
    pub latency: Option<JsonWindow>,
    pub labels: Vec<JsonLabelProgress>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonLabelProgress {
    pub label: String,
    pub samples_per_sec: f64,
    pub samples: u64,
    pub failures: u64,
    pub latency: Option<JsonWindow>,
}

/// Response-time window of the interval, in milliseconds.
#[derive(Debug, Serialize)]
pub(crate) struct JsonWindow {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p90: f64,
    pub ok_p90: Option<f64>,
    pub ko_p90: Option<f64>,
}

fn window(s: &MetricSnapshot) -> Option<JsonWindow> {
    (s.all.count > 0).then(|| JsonWindow {
        count: s.all.count,
        min: s.all.min,
        max: s.all.max,
        mean: s.all.mean,
        p90: s.percentile(90.0),
        ok_p90: (s.ok.count > 0).then(|| s.ok_percentile(90.0)),
        ko_p90: (s.ko.count > 0).then(|| s.ko_percentile(90.0)),
    })
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        interval_secs: u.interval.as_secs_f64(),
        active_threads: u.active_threads,
        samples_per_sec: u.throughput,
        samples: u.all.count(),
        failures: u.all.failures,
        latency: window(&u.all),
        labels: u
            .labels
            .iter()
            .map(|l| JsonLabelProgress {
                label: l.label.to_string(),
                samples_per_sec: l.throughput,
                samples: l.snapshot.count(),
                failures: l.snapshot.failures,
                latency: window(&l.snapshot),
            })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub name: String,
    pub elapsed_secs: f64,
    pub peak_threads: u64,
    pub labels: Vec<JsonLabelSummary>,
    pub groups: Vec<JsonGroupSummary>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonLabelSummary {
    pub label: String,
    pub samples: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub hits: u64,
    pub samples_per_sec: f64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub latency_ms: JsonLatency,
    pub errors: Vec<JsonError>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonLatency {
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonError {
    pub code: String,
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonGroupSummary {
    pub name: String,
    pub threads_started: u64,
    pub peak_threads: u64,
    pub samples: u64,
    pub iterations: u64,
}

fn label_summary(l: &LabelSummary, elapsed_secs: f64) -> JsonLabelSummary {
    let lat = &l.latency_ms;
    JsonLabelSummary {
        label: l.label.clone(),
        samples: l.samples,
        failures: l.failures,
        error_rate: l.error_rate(),
        hits: l.hits,
        samples_per_sec: per_sec(l.samples, elapsed_secs),
        sent_bytes: l.sent_bytes,
        received_bytes: l.received_bytes,
        latency_ms: JsonLatency {
            min: lat.min,
            mean: lat.mean,
            stdev: lat.stdev,
            p50: lat.p50,
            p90: lat.p90,
            p95: lat.p95,
            p99: lat.p99,
            max: lat.max,
        },
        errors: l
            .errors
            .iter()
            .map(|(ErrorKey { response_code, response_message }, count)| JsonError {
                code: response_code.clone(),
                message: response_message.clone(),
                count: *count,
            })
            .collect(),
    }
}

pub(crate) fn build_summary_line(summary: &RunSummary) -> JsonSummaryLine {
    let elapsed_secs = summary.elapsed.as_secs_f64();
    JsonSummaryLine {
        kind: "summary",
        name: summary.name.clone(),
        elapsed_secs,
        peak_threads: summary.peak_threads,
        labels: summary
            .labels
            .iter()
            .map(|l| label_summary(l, elapsed_secs))
            .collect(),
        groups: summary
            .groups
            .iter()
            .map(|g| JsonGroupSummary {
                name: g.name.to_string(),
                threads_started: g.threads_started,
                peak_threads: g.peak_threads,
                samples: g.samples,
                iterations: g.iterations,
            })
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(value: &T) {
    let Ok(line) = serde_json::to_string(value) else {
        return;
    };
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}
