use std::sync::Arc;
use std::thread;

use paced_metrics::{MetricsConfig, MetricsRegistry, SampleOutcome, WindowMode};

#[test]
fn snapshots_are_consistent_while_writers_add() -> anyhow::Result<()> {
    let reg = Arc::new(MetricsRegistry::new(MetricsConfig::default())?);

    let writers: Vec<_> = (0..8)
        .map(|t| {
            let reg = reg.clone();
            thread::spawn(move || {
                for i in 0..500u64 {
                    let outcome = if i % 10 == 0 {
                        SampleOutcome::failure("req", i % 50, "500", "boom")
                    } else {
                        SampleOutcome::success("req", i % 50)
                    };
                    reg.add(&outcome);
                    if t == 0 && i % 100 == 0 {
                        let snap = reg.all_snapshot();
                        assert!(snap.count() >= snap.failures);
                    }
                }
            })
        })
        .collect();

    for w in writers {
        w.join().map_err(|_| anyhow::anyhow!("writer panicked"))?;
    }

    let snap = reg
        .snapshot("req")
        .ok_or_else(|| anyhow::anyhow!("missing label"))?;
    anyhow::ensure!(snap.count() == 4000, "count = {}", snap.count());
    anyhow::ensure!(snap.failures == 400, "failures = {}", snap.failures);
    anyhow::ensure!(snap.hits == 4000);
    anyhow::ensure!(snap.all.count == 100, "fixed window holds 100 samples");
    anyhow::ensure!(snap.errors.len() == 1);
    Ok(())
}

#[test]
fn timed_window_percentiles_cover_the_whole_interval() -> anyhow::Result<()> {
    let reg = MetricsRegistry::new(MetricsConfig::default().with_window_mode(WindowMode::Timed))?;
    for ms in 1..=1000u64 {
        reg.add(&SampleOutcome::success("req", ms));
    }

    let snap = reg
        .snapshot("req")
        .ok_or_else(|| anyhow::anyhow!("missing label"))?;
    anyhow::ensure!(snap.all.count == 1000);
    let p90 = snap.percentile(90.0);
    anyhow::ensure!((p90 - 900.9).abs() < 1e-6, "p90 = {p90}");

    reg.reset_interval();
    let snap = reg
        .snapshot("req")
        .ok_or_else(|| anyhow::anyhow!("missing label"))?;
    anyhow::ensure!(snap.percentile(90.0).is_nan());
    Ok(())
}
