use std::sync::Arc;
use std::time::Duration;

use paced_metrics::{MetricSnapshot, MetricsRegistry, per_sec};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::active::ActiveThreads;

/// One label's view of the interval that just ended.
#[derive(Debug, Clone)]
pub struct LabelProgress {
    pub label: Arc<str>,
    pub snapshot: MetricSnapshot,
    /// Samples/sec over the interval.
    pub throughput: f64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub tick: u64,
    pub elapsed: Duration,
    /// Actual time since the previous update.
    pub interval: Duration,
    pub active_threads: u64,
    pub labels: Vec<LabelProgress>,
    pub all: MetricSnapshot,
    pub throughput: f64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

/// Emits a [`ProgressUpdate`] every `every`, then starts a new window interval.
///
/// The task runs until aborted.
pub(crate) fn spawn_reporter(
    registry: Arc<MetricsRegistry>,
    threads: Arc<ActiveThreads>,
    started: Instant,
    every: Duration,
    progress: ProgressFn,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick is immediate
        interval.tick().await;

        let mut tick: u64 = 0;
        let mut last_at = Instant::now();
        loop {
            interval.tick().await;
            tick = tick.saturating_add(1);
            let now = Instant::now();
            let dt = now.duration_since(last_at);
            last_at = now;

            let update = collect(&registry, &threads, tick, now.duration_since(started), dt);
            (progress)(update);
            registry.reset_interval();
        }
    })
}

fn collect(
    registry: &MetricsRegistry,
    threads: &ActiveThreads,
    tick: u64,
    elapsed: Duration,
    dt: Duration,
) -> ProgressUpdate {
    let dt_secs = dt.as_secs_f64();
    let labels = registry
        .labels()
        .into_iter()
        .filter_map(|label| {
            let snapshot = registry.snapshot(&label)?;
            Some(LabelProgress {
                throughput: per_sec(snapshot.count(), dt_secs),
                label,
                snapshot,
            })
        })
        .collect();
    let all = registry.all_snapshot();

    ProgressUpdate {
        tick,
        elapsed,
        interval: dt,
        active_threads: threads.count(),
        labels,
        throughput: per_sec(all.count(), dt_secs),
        all,
    }
}
