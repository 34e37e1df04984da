use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paced_core::metrics::SampleOutcome;
use paced_core::{
    ClosedModel, ConfigElement, ControlSignal, ControllerKind, CounterConfig, Error, LoopCount,
    OnSampleError, OpenModel, ProgressUpdate, RunOptions, SampleContext, Sampler, SamplerError,
    SignalTarget, TestElement, TestPlan, TestRun, ThreadGroup, ThroughputMode, TimerSpec,
    run_test_plan,
};
use parking_lot::Mutex;

#[derive(Debug)]
struct Sleep {
    ms: u64,
    code: Option<&'static str>,
}

impl Sleep {
    fn ok(ms: u64) -> Arc<Self> {
        Arc::new(Self { ms, code: None })
    }

    fn failing(ms: u64, code: &'static str) -> Arc<Self> {
        Arc::new(Self {
            ms,
            code: Some(code),
        })
    }
}

#[async_trait]
impl Sampler for Sleep {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleOutcome, SamplerError> {
        tokio::time::sleep(Duration::from_millis(self.ms)).await;
        Ok(match self.code {
            None => SampleOutcome::success(ctx.label.clone(), self.ms),
            Some(code) => SampleOutcome::failure(ctx.label.clone(), self.ms, code, "failed"),
        })
    }
}

fn plan(groups: Vec<ThreadGroup>) -> TestPlan {
    TestPlan {
        name: "plan".to_string(),
        elements: Vec::new(),
        groups,
    }
}

fn labels(summary: &paced_core::RunSummary) -> Vec<String> {
    summary
        .labels
        .iter()
        .map(|l| l.label.clone())
        .filter(|l| l != "all")
        .collect()
}

#[tokio::test(start_paused = true)]
async fn open_model_spawns_exactly_the_scheduled_users() {
    let counter = TestElement::config("c", ConfigElement::Counter(CounterConfig::new("c")));
    let group = ThreadGroup::open(
        "arrivals",
        OpenModel {
            schedule: "rate(50/sec) random_arrivals(100ms) pause(2s)".to_string(),
            random_seed: 42,
        },
        vec![counter, TestElement::sampler("${c}", Sleep::ok(5))],
    );

    let summary = run_test_plan(&plan(vec![group]), RunOptions::default(), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(labels(&summary), ["0", "1", "2", "3", "4"]);
    assert_eq!(summary.groups[0].threads_started, 5);
    assert_eq!(summary.total_samples(), 5);
    assert_eq!(summary.elapsed, Duration::from_millis(2100));
}

#[tokio::test(start_paused = true)]
async fn closed_model_ramps_up_linearly() {
    let group = ThreadGroup::closed(
        "ramp",
        ClosedModel {
            threads: 5,
            ramp_up: Duration::from_secs(5),
            loops: LoopCount::Finite(2),
            ..ClosedModel::default()
        },
        vec![TestElement::sampler("s", Sleep::ok(100))],
    );

    let summary = run_test_plan(&plan(vec![group]), RunOptions::default(), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let g = &summary.groups[0];
    assert_eq!(g.threads_started, 5);
    assert_eq!(g.samples, 10);
    // one new user per second, each done after 200ms
    assert_eq!(g.peak_threads, 1);
    assert_eq!(summary.elapsed, Duration::from_millis(4200));
}

#[tokio::test(start_paused = true)]
async fn groups_run_concurrently_and_report_in_order() {
    let a = ThreadGroup::closed(
        "a",
        ClosedModel {
            threads: 2,
            ..ClosedModel::default()
        },
        vec![TestElement::sampler("a", Sleep::ok(1000))],
    );
    let b = ThreadGroup::closed(
        "b",
        ClosedModel {
            threads: 3,
            ..ClosedModel::default()
        },
        vec![TestElement::sampler("b", Sleep::ok(500))],
    );

    let summary = run_test_plan(&plan(vec![a, b]), RunOptions::default(), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let names: Vec<_> = summary.groups.iter().map(|g| g.name.to_string()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(summary.peak_threads, 5);
    assert_eq!(summary.elapsed, Duration::from_secs(1));
    assert_eq!(summary.label("b").map(|l| l.samples), Some(3));
}

#[tokio::test(start_paused = true)]
async fn shared_throughput_paces_across_groups() {
    let group = |name: &str| {
        ThreadGroup::closed(
            name,
            ClosedModel {
                loops: LoopCount::Finite(2),
                ..ClosedModel::default()
            },
            vec![TestElement::sampler(name, Sleep::ok(0))],
        )
    };
    let mut p = plan(vec![group("a"), group("b")]);
    p.elements.push(TestElement::Timer(TimerSpec::ConstantThroughput {
        per_minute: 60.0,
        mode: ThroughputMode::AllActiveThreadsShared,
    }));

    let summary = run_test_plan(&p, RunOptions::default(), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(summary.total_samples(), 4);
    // four one-second slots reserved on a single cursor
    assert_eq!(summary.elapsed, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn whole_test_stop_halts_every_group() {
    let stopper = ThreadGroup::closed(
        "stopper",
        ClosedModel::default(),
        vec![
            TestElement::sampler("wait", Sleep::ok(1000)),
            TestElement::action(ControlSignal::Stop, SignalTarget::WholeTest),
        ],
    );
    let busy = ThreadGroup::closed(
        "busy",
        ClosedModel {
            threads: 2,
            loops: LoopCount::Infinite,
            duration: Some(Duration::from_secs(60)),
            ..ClosedModel::default()
        },
        vec![TestElement::sampler("busy", Sleep::ok(300))],
    );

    let summary = run_test_plan(&plan(vec![stopper, busy]), RunOptions::default(), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    // busy samplers in flight at 1000ms finish at 1200ms
    assert_eq!(summary.elapsed, Duration::from_millis(1200));
    assert_eq!(summary.label("busy").map(|l| l.samples), Some(8));
}

#[tokio::test(start_paused = true)]
async fn stop_test_now_policy_abandons_in_flight_samples() {
    let failing = ThreadGroup::closed(
        "failing",
        ClosedModel::default(),
        vec![TestElement::sampler("bad", Sleep::failing(500, "500"))],
    )
    .with_on_sample_error(OnSampleError::StopTestNow);
    let slow = ThreadGroup::closed(
        "slow",
        ClosedModel::default(),
        vec![TestElement::sampler("slow", Sleep::ok(10_000))],
    );

    let summary = run_test_plan(&plan(vec![failing, slow]), RunOptions::default(), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(summary.elapsed, Duration::from_millis(500));
    assert_eq!(summary.total_failures(), 1);
    assert!(summary.label("slow").is_none());
}

#[tokio::test(start_paused = true)]
async fn external_stop_ends_an_unbounded_run() {
    let group = ThreadGroup::closed(
        "loop",
        ClosedModel {
            threads: 3,
            loops: LoopCount::Infinite,
            duration: Some(Duration::from_secs(3600)),
            ..ClosedModel::default()
        },
        vec![TestElement::sampler("s", Sleep::ok(250))],
    );

    let run = TestRun::start(&plan(vec![group]), RunOptions::default(), None)
        .unwrap_or_else(|e| panic!("{e}"));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(run.active_threads(), 3);
    run.stop();

    let summary = run.wait().await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(summary.elapsed, Duration::from_millis(1250));
    assert_eq!(summary.total_samples(), 15);
}

#[tokio::test(start_paused = true)]
async fn progress_is_reported_every_interval() {
    let group = ThreadGroup::closed(
        "g",
        ClosedModel {
            threads: 2,
            loops: LoopCount::Finite(7),
            ..ClosedModel::default()
        },
        vec![TestElement::sampler("s", Sleep::ok(500))],
    );
    let seen: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::default();
    let sink = seen.clone();

    let opts = RunOptions {
        report_interval: Some(Duration::from_secs(1)),
        ..RunOptions::default()
    };
    run_test_plan(
        &plan(vec![group]),
        opts,
        Some(Arc::new(move |u| sink.lock().push(u))),
    )
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    let seen = seen.lock();
    // run lasts 3.5s
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|u| u.active_threads == 2));
    let ticks: Vec<_> = seen.iter().map(|u| u.tick).collect();
    assert_eq!(ticks, [1, 2, 3]);
}

#[test]
fn invalid_plans_fail_before_starting() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| panic!("{e}"));
    let _guard = rt.enter();

    let empty = TestRun::start(&plan(Vec::new()), RunOptions::default(), None);
    assert!(matches!(empty, Err(Error::EmptyPlan)));

    let bad_schedule = ThreadGroup::open(
        "open",
        OpenModel {
            schedule: "rate(5/sec) sometimes(1s)".to_string(),
            random_seed: 0,
        },
        Vec::new(),
    );
    let res = TestRun::start(&plan(vec![bad_schedule]), RunOptions::default(), None);
    assert!(matches!(res, Err(Error::Schedule { .. })));

    let zero_interval = RunOptions {
        report_interval: Some(Duration::ZERO),
        ..RunOptions::default()
    };
    let group = ThreadGroup::closed(
        "g",
        ClosedModel::default(),
        vec![TestElement::controller("noop", ControllerKind::Simple, Vec::new())],
    );
    let res = TestRun::start(&plan(vec![group]), zero_interval, None);
    assert!(matches!(res, Err(Error::InvalidReportInterval)));
}
