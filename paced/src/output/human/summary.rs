use std::fmt::Write as _;

use paced_core::RunSummary;
use paced_core::metrics::{ALL_LABEL, LabelSummary};

use super::format::*;

const LABEL_WIDTH: usize = 24;

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    writeln!(
        out,
        "summary: {} (elapsed {}, peak threads {})",
        summary.name,
        format_duration(summary.elapsed),
        summary.peak_threads
    )
    .ok();

    if summary.labels.iter().all(|l| l.label == ALL_LABEL) {
        out.push_str("  no samples recorded\n");
        render_groups(summary, &mut out);
        return out;
    }

    writeln!(
        out,
        "\n{:<LABEL_WIDTH$} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>10} {:>10} {:>10}",
        "label", "samples", "error%", "mean", "p50", "p90", "p95", "p99", "max", "rate/s", "received", "sent"
    )
    .ok();

    let secs = summary.elapsed.as_secs_f64().max(1e-9);
    for l in &summary.labels {
        render_row(l, secs, &mut out);
    }

    render_errors(summary, &mut out);
    render_groups(summary, &mut out);
    out
}

fn render_row(l: &LabelSummary, secs: f64, out: &mut String) {
    let label = if l.label.len() > LABEL_WIDTH {
        let cut = (0..LABEL_WIDTH)
            .rev()
            .find(|i| l.label.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}~", &l.label[..cut])
    } else {
        l.label.clone()
    };
    let lat = &l.latency_ms;

    writeln!(
        out,
        "{:<LABEL_WIDTH$} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>10} {:>10} {:>10}",
        label,
        l.samples,
        format_pct(l.error_rate()),
        format_ms(lat.mean),
        format_ms(lat.p50),
        format_ms(lat.p90),
        format_ms(lat.p95),
        format_ms(lat.p99),
        format_ms(lat.max),
        format_rate(l.samples as f64 / secs),
        format_bytes(l.received_bytes),
        format_bytes(l.sent_bytes),
    )
    .ok();
}

fn render_errors(summary: &RunSummary, out: &mut String) {
    let failing: Vec<_> = summary
        .labels
        .iter()
        .filter(|l| l.label != ALL_LABEL && !l.errors.is_empty())
        .collect();
    if failing.is_empty() {
        return;
    }

    out.push_str("\nerrors\n");
    for l in failing {
        writeln!(out, "  {}", l.label).ok();
        for (key, count) in &l.errors {
            writeln!(
                out,
                "    {} {}: {count}",
                key.response_code, key.response_message
            )
            .ok();
        }
    }
}

fn render_groups(summary: &RunSummary, out: &mut String) {
    if summary.groups.is_empty() {
        return;
    }
    out.push_str("\nthread groups\n");
    for g in &summary.groups {
        writeln!(
            out,
            "  {}: threads={} peak={} samples={} iterations={}",
            g.name, g.threads_started, g.peak_threads, g.samples, g.iterations
        )
        .ok();
    }
}
