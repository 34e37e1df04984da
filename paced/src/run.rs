use std::time::Duration;

use paced_core::metrics::MetricsConfig;
use paced_core::{RunOptions, TestPlan, TestRun, ThreadGroupKind, ThreadSchedule};
use tracing::warn;

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan_yaml::load_plan;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let plan = load_plan(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;

    let out = output::formatter(args.output, expected_duration(&plan));
    let opts = RunOptions {
        metrics: MetricsConfig {
            window_mode: args.window_mode,
            window_size: usize::try_from(args.window_size).unwrap_or(usize::MAX),
        },
        report_interval: Some(args.report_interval),
        random_seed: args.seed,
    };

    out.print_header(&args.plan, &plan);
    let run = TestRun::start(&plan, opts, out.progress()).map_err(RunError::from_core)?;

    let control = run.control().clone();
    let interrupts = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupted, finishing in-flight samples (interrupt again to abandon them)");
        control.request_stop();
        if tokio::signal::ctrl_c().await.is_ok() {
            control.request_stop_now();
        }
    });

    let summary = run.wait().await;
    interrupts.abort();
    let summary = summary.map_err(RunError::from_core)?;

    out.print_summary(&summary)
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_failures(
        summary.total_failures(),
        args.fail_on_error,
    ))
}

pub async fn validate(args: ValidateArgs) -> Result<(), RunError> {
    let plan = load_plan(&args.plan)
        .await
        .map_err(RunError::InvalidInput)?;
    let compiled = paced_core::compile(&plan).map_err(RunError::from_core)?;

    println!("plan `{}` is valid", compiled.name);
    for g in &compiled.groups {
        println!(
            "  {}: samplers={} configs={} timers={} listeners={}",
            g.name,
            g.plan.sampler_count(),
            g.plan.config_count(),
            g.plan.timer_count(),
            g.plan.listener_count()
        );
    }
    Ok(())
}

/// Upper bound of the run length, when every group has one.
fn expected_duration(plan: &TestPlan) -> Option<Duration> {
    plan.groups
        .iter()
        .map(|g| match &g.kind {
            ThreadGroupKind::Closed(m) => m.duration.map(|d| m.start_delay.saturating_add(d)),
            ThreadGroupKind::Open(m) => m
                .schedule
                .parse::<ThreadSchedule>()
                .ok()
                .map(|s| s.total_duration()),
        })
        .try_fold(Duration::ZERO, |acc, d| d.map(|d| acc.max(d)))
        .filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan_yaml::parse_plan;

    fn plan(src: &str) -> TestPlan {
        parse_plan(src.as_bytes(), "t").unwrap_or_else(|e| panic!("{e:#}"))
    }

    #[test]
    fn expected_duration_is_the_longest_bounded_group() {
        let p = plan(
            r#"
groups:
  - {kind: closed, name: a, duration: 10s, startDelay: 5s}
  - {kind: open, name: b, schedule: "rate(1/sec) random_arrivals(20s) pause(2s)"}
"#,
        );
        assert_eq!(expected_duration(&p), Some(Duration::from_secs(22)));
    }

    #[test]
    fn expected_duration_is_unknown_for_loop_bound_groups() {
        let p = plan(
            r#"
groups:
  - {kind: closed, name: a, duration: 10s}
  - {kind: closed, name: b, loops: 5}
"#,
        );
        assert_eq!(expected_duration(&p), None);
    }

    #[test]
    fn expected_duration_saturates() {
        let p = plan(
            r#"
groups:
  - {kind: closed, name: a, duration: 18446744073709551615, startDelay: 10s}
"#,
        );
        assert_eq!(expected_duration(&p), Some(Duration::MAX));
    }
}
