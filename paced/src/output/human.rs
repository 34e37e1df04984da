use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_ms, format_rate};
use paced_core::{ProgressUpdate, ThreadGroupKind};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new(expected: Option<Duration>) -> Self {
        Self {
            progress: Arc::new(HumanProgress::new(expected)),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, plan: &paced_core::TestPlan) {
        println!("plan: {} ({})", plan.name, plan_path.display());
        for g in &plan.groups {
            match &g.kind {
                ThreadGroupKind::Closed(m) => println!(
                    "group: {} closed threads={} ramp_up={:?} loops={:?} duration={:?}",
                    g.name, m.threads, m.ramp_up, m.loops, m.duration
                ),
                ThreadGroupKind::Open(m) => {
                    println!("group: {} open schedule=\"{}\"", g.name, m.schedule);
                }
            }
        }
        println!();
    }

    fn progress(&self) -> Option<paced_core::ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u| {
            let message = progress_line(&u);
            progress.update(u.elapsed, message);
        }))
    }

    fn print_summary(&self, summary: &paced_core::RunSummary) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary));
        Ok(())
    }
}

fn progress_line(u: &ProgressUpdate) -> String {
    let all = &u.all;
    let mean = (all.all.count > 0).then_some(all.all.mean);
    let p90 = (all.all.count > 0).then(|| all.percentile(90.0));
    format!(
        "threads={} elapsed={} rate={}/s errors={}/{} mean={} p90={}",
        u.active_threads,
        format_duration(u.elapsed),
        format_rate(u.throughput),
        all.failures,
        all.count(),
        format_ms(mean),
        format_ms(p90),
    )
}
