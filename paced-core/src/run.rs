use std::sync::Arc;
use std::time::Duration;

use paced_metrics::{ALL_LABEL, LabelSummary, MetricsConfig, MetricsRegistry};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use crate::active::ActiveThreads;
use crate::compiler::{CompiledPlan, compile};
use crate::control::{RunClock, RunControl};
use crate::error::{Error, Result};
use crate::group::{GroupReport, run_group};
use crate::plan::TestPlan;
use crate::progress::{ProgressFn, spawn_reporter};
use crate::timer::{ThroughputCursor, TimerEnv};
use crate::vu::GroupContext;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub metrics: MetricsConfig,
    /// Live progress period; `None` disables the reporter.
    pub report_interval: Option<Duration>,
    /// Seeds timers and arrivals of groups without their own seed.
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub name: String,
    pub elapsed: Duration,
    /// Sorted by label, the `all` aggregate last.
    pub labels: Vec<LabelSummary>,
    pub groups: Vec<GroupReport>,
    pub peak_threads: u64,
}

impl RunSummary {
    pub fn label(&self, label: &str) -> Option<&LabelSummary> {
        self.labels.iter().find(|l| l.label == label)
    }

    pub fn all(&self) -> Option<&LabelSummary> {
        self.label(ALL_LABEL)
    }

    pub fn total_failures(&self) -> u64 {
        self.all().map_or(0, |a| a.failures)
    }

    pub fn total_samples(&self) -> u64 {
        self.all().map_or(0, |a| a.samples)
    }
}

/// A started test run.
///
/// Groups run in the background; stop requests can be issued from any task
/// while [`TestRun::wait`] collects the summary.
#[derive(Debug)]
pub struct TestRun {
    control: Arc<RunControl>,
    registry: Arc<MetricsRegistry>,
    threads: Arc<ActiveThreads>,
    handle: JoinHandle<Result<RunSummary>>,
}

impl TestRun {
    /// Compiles `plan` and starts every thread group.
    ///
    /// Plan errors are returned here, before any user starts.
    pub fn start(plan: &TestPlan, opts: RunOptions, progress: Option<ProgressFn>) -> Result<Self> {
        if opts.report_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidReportInterval);
        }
        let compiled = compile(plan)?;
        let registry = Arc::new(MetricsRegistry::new(opts.metrics)?);
        let control = Arc::new(RunControl::new());
        let threads = ActiveThreads::new();

        let handle = tokio::spawn(orchestrate(
            compiled,
            opts,
            progress,
            registry.clone(),
            control.clone(),
            threads.clone(),
        ));
        Ok(Self {
            control,
            registry,
            threads,
            handle,
        })
    }

    /// Users finish their current sampler; no new users start.
    pub fn stop(&self) {
        info!("graceful stop requested");
        self.control.request_stop();
    }

    /// Users abandon in-flight samplers and sleeps.
    pub fn stop_now(&self) {
        info!("immediate stop requested");
        self.control.request_stop_now();
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn active_threads(&self) -> u64 {
        self.threads.count()
    }

    pub async fn wait(self) -> Result<RunSummary> {
        self.handle.await?
    }
}

/// Runs `plan` to completion.
pub async fn run_test_plan(
    plan: &TestPlan,
    opts: RunOptions,
    progress: Option<ProgressFn>,
) -> Result<RunSummary> {
    TestRun::start(plan, opts, progress)?.wait().await
}

async fn orchestrate(
    plan: CompiledPlan,
    opts: RunOptions,
    progress: Option<ProgressFn>,
    registry: Arc<MetricsRegistry>,
    control: Arc<RunControl>,
    threads: Arc<ActiveThreads>,
) -> Result<RunSummary> {
    let clock = RunClock::start();
    info!(
        plan = %plan.name,
        groups = plan.groups.len(),
        window_mode = %opts.metrics.window_mode,
        "test run started"
    );

    let reporter = match (progress, opts.report_interval) {
        (Some(progress), Some(every)) => Some(spawn_reporter(
            registry.clone(),
            threads.clone(),
            clock.started_at(),
            every,
            progress,
        )),
        _ => None,
    };

    let run_cursor = Arc::new(ThroughputCursor::default());
    let mut set = JoinSet::new();
    for (idx, group) in plan.groups.into_iter().enumerate() {
        let ctx = Arc::new(GroupContext {
            plan: group.plan,
            registry: registry.clone(),
            control: control.clone(),
            clock,
            env: TimerEnv::new(threads.clone(), ActiveThreads::child_of(threads.clone()))
                .with_run_cursor(run_cursor.clone()),
            seed: opts.random_seed,
        });
        let model = group.model;
        set.spawn(async move { (idx, run_group(model, ctx).await) });
    }

    let mut groups = Vec::with_capacity(set.len());
    let mut first_error = None;
    while let Some(res) = set.join_next().await {
        match res {
            Ok((idx, Ok(report))) => groups.push((idx, report)),
            Ok((_, Err(e))) => {
                if first_error.is_none() {
                    warn!(error = %e, "thread group failed, stopping the run");
                    control.request_stop();
                    first_error = Some(e);
                }
            }
            Err(e) => {
                control.request_stop();
                first_error.get_or_insert(Error::Join(e));
            }
        }
    }

    if let Some(handle) = reporter {
        handle.abort();
        let _ = handle.await;
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    groups.sort_by_key(|(idx, _)| *idx);
    let elapsed = clock.elapsed();
    info!(plan = %plan.name, elapsed = ?elapsed, "test run finished");

    Ok(RunSummary {
        name: plan.name,
        elapsed,
        labels: registry.summaries(),
        groups: groups.into_iter().map(|(_, g)| g).collect(),
        peak_threads: threads.peak(),
    })
}
