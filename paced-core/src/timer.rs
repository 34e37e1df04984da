use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;

use crate::active::ActiveThreads;
use crate::error::{Error, Result};

const MS_PER_MINUTE: f64 = 60_000.0;

/// Mean at which Poisson sampling switches to the normal approximation.
pub const POISSON_NORMAL_THRESHOLD: f64 = 30.0;

/// How a [`TimerSpec::ConstantThroughput`] spreads its target rate.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ThroughputMode {
    /// Each user paces itself to the full rate.
    #[default]
    PerThread,
    /// Rate is shared by every active user of the run.
    AllActiveThreads,
    /// Rate is shared by the active users of the timer's thread group.
    AllActiveThreadsInGroup,
    /// One run-wide cursor advanced by the rounded per-request interval.
    AllActiveThreadsShared,
    /// One group cursor advanced by the exact per-request interval.
    AllActiveThreadsPrecise,
}

impl ThroughputMode {
    fn uses_cursor(self) -> bool {
        matches!(
            self,
            Self::AllActiveThreadsShared | Self::AllActiveThreadsPrecise
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimerSpec {
    Constant {
        delay: Duration,
    },
    UniformRandom {
        delay: Duration,
        range: Duration,
    },
    /// `delay` plus a Poisson sample whose mean is `lambda` milliseconds.
    PoissonRandom {
        delay: Duration,
        lambda: Duration,
    },
    ConstantThroughput {
        per_minute: f64,
        mode: ThroughputMode,
    },
}

impl TimerSpec {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Self::ConstantThroughput { per_minute, .. } = self
            && !(per_minute.is_finite() && *per_minute > 0.0)
        {
            return Err(Error::InvalidThroughput(*per_minute));
        }
        Ok(())
    }

    pub(crate) fn build(&self, env: &TimerEnv, rng: StdRng) -> Box<dyn Timer> {
        match self {
            Self::Constant { delay } => Box::new(ConstantTimer {
                delay_ms: as_ms(*delay),
            }),
            Self::UniformRandom { delay, range } => {
                Box::new(UniformRandomTimer::new(*delay, *range, rng))
            }
            Self::PoissonRandom { delay, lambda } => {
                Box::new(PoissonRandomTimer::new(*delay, *lambda, rng))
            }
            Self::ConstantThroughput { per_minute, mode } => {
                Box::new(ConstantThroughputTimer::new(*per_minute, *mode, env.clone()))
            }
        }
    }
}

/// Computes how long a user waits before its next sample.
pub trait Timer: Send + fmt::Debug {
    fn delay(&mut self, now_ms: u64) -> u64;

    fn iteration_start(&mut self) {}
}

/// Whether sleeping `delay_ms` from `now_ms` would overrun the user's end time.
pub fn exceeds_end_time(now_ms: u64, delay_ms: u64, end_time_ms: Option<u64>) -> bool {
    match end_time_ms {
        Some(end) => now_ms.saturating_add(delay_ms) > end,
        None => false,
    }
}

/// Shared "next scheduled sample" instant.
#[derive(Debug, Default)]
pub struct ThroughputCursor {
    next_ms: Mutex<Option<f64>>,
}

impl ThroughputCursor {
    /// Reserves the next slot and returns how long to wait for it.
    pub fn advance(&self, now_ms: u64, interval_ms: f64) -> u64 {
        let now = now_ms as f64;
        let mut next = self.next_ms.lock();
        let scheduled = match *next {
            Some(last) => (last + interval_ms).max(now),
            None => now,
        };
        *next = Some(scheduled);
        (scheduled - now).round().max(0.0) as u64
    }
}

/// Shared state a timer may read while computing delays.
#[derive(Debug, Clone)]
pub struct TimerEnv {
    pub run_threads: Arc<ActiveThreads>,
    pub group_threads: Arc<ActiveThreads>,
    /// Per timer and group, used by [`ThroughputMode::AllActiveThreadsPrecise`].
    pub cursor: Arc<ThroughputCursor>,
    /// One for the whole run, used by [`ThroughputMode::AllActiveThreadsShared`].
    pub run_cursor: Arc<ThroughputCursor>,
}

impl TimerEnv {
    pub fn new(run_threads: Arc<ActiveThreads>, group_threads: Arc<ActiveThreads>) -> Self {
        Self {
            run_threads,
            group_threads,
            cursor: Arc::new(ThroughputCursor::default()),
            run_cursor: Arc::new(ThroughputCursor::default()),
        }
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: Arc<ThroughputCursor>) -> Self {
        self.cursor = cursor;
        self
    }

    #[must_use]
    pub fn with_run_cursor(mut self, cursor: Arc<ThroughputCursor>) -> Self {
        self.run_cursor = cursor;
        self
    }
}

#[derive(Debug)]
pub struct ConstantTimer {
    delay_ms: u64,
}

impl Timer for ConstantTimer {
    fn delay(&mut self, _now_ms: u64) -> u64 {
        self.delay_ms
    }
}

#[derive(Debug)]
pub struct UniformRandomTimer {
    delay_ms: u64,
    range_ms: f64,
    rng: StdRng,
    jitter_ms: Option<u64>,
}

impl UniformRandomTimer {
    pub fn new(delay: Duration, range: Duration, rng: StdRng) -> Self {
        Self {
            delay_ms: as_ms(delay),
            range_ms: range.as_secs_f64() * 1000.0,
            rng,
            jitter_ms: None,
        }
    }
}

impl Timer for UniformRandomTimer {
    fn delay(&mut self, _now_ms: u64) -> u64 {
        let jitter = match self.jitter_ms {
            Some(j) => j,
            None => {
                let j = (self.rng.r#gen::<f64>() * self.range_ms).floor() as u64;
                self.jitter_ms = Some(j);
                j
            }
        };
        self.delay_ms.saturating_add(jitter)
    }

    fn iteration_start(&mut self) {
        self.jitter_ms = None;
    }
}

#[derive(Debug)]
pub struct PoissonRandomTimer {
    delay_ms: u64,
    mean_ms: f64,
    rng: StdRng,
}

impl PoissonRandomTimer {
    pub fn new(delay: Duration, lambda: Duration, rng: StdRng) -> Self {
        Self {
            delay_ms: as_ms(delay),
            mean_ms: lambda.as_secs_f64() * 1000.0,
            rng,
        }
    }
}

impl Timer for PoissonRandomTimer {
    fn delay(&mut self, _now_ms: u64) -> u64 {
        self.delay_ms
            .saturating_add(poisson_sample(&mut self.rng, self.mean_ms))
    }
}

/// Draws from a Poisson distribution with the given mean.
///
/// Small means use Knuth's multiplication method; from
/// [`POISSON_NORMAL_THRESHOLD`] on, a continuity-corrected normal approximation.
pub fn poisson_sample<R: Rng + ?Sized>(rng: &mut R, mean: f64) -> u64 {
    if mean.is_nan() || mean <= 0.0 || mean.is_infinite() {
        return 0;
    }

    if mean < POISSON_NORMAL_THRESHOLD {
        let limit = (-mean).exp();
        let mut k = 0u64;
        let mut p = 1.0f64;
        loop {
            p *= rng.r#gen::<f64>();
            if p <= limit {
                return k;
            }
            k += 1;
        }
    }

    let z = standard_normal(rng);
    (mean + mean.sqrt() * z + 0.5).floor().max(0.0) as u64
}

// Box-Muller.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.r#gen::<f64>();
    let u2 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Paces samples to a target rate expressed per minute.
#[derive(Debug)]
pub struct ConstantThroughputTimer {
    per_minute: f64,
    mode: ThroughputMode,
    env: TimerEnv,
    previous_ms: Option<u64>,
}

impl ConstantThroughputTimer {
    pub fn new(per_minute: f64, mode: ThroughputMode, env: TimerEnv) -> Self {
        Self {
            per_minute,
            mode,
            env,
            previous_ms: None,
        }
    }

    pub fn mode(&self) -> ThroughputMode {
        self.mode
    }

    fn ms_per_request(&self) -> f64 {
        MS_PER_MINUTE / self.per_minute
    }

    fn interval_ms(&self, now_ms: u64) -> u64 {
        let ms = self.ms_per_request();
        match self.mode {
            ThroughputMode::PerThread => ms.round() as u64,
            ThroughputMode::AllActiveThreads => {
                (self.env.run_threads.count().max(1) as f64 * ms).round() as u64
            }
            ThroughputMode::AllActiveThreadsInGroup => {
                (self.env.group_threads.count().max(1) as f64 * ms).round() as u64
            }
            ThroughputMode::AllActiveThreadsShared => {
                self.env.run_cursor.advance(now_ms, ms.round())
            }
            ThroughputMode::AllActiveThreadsPrecise => self.env.cursor.advance(now_ms, ms),
        }
    }

    /// Instant at which the next sample should start if issued at `now_ms`.
    pub fn calculate_current_target(&mut self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.interval_ms(now_ms))
    }
}

impl Timer for ConstantThroughputTimer {
    fn delay(&mut self, now_ms: u64) -> u64 {
        if self.mode.uses_cursor() {
            return self.interval_ms(now_ms);
        }

        let interval = self.interval_ms(now_ms);
        let Some(previous) = self.previous_ms else {
            self.previous_ms = Some(now_ms);
            return 0;
        };

        let target = previous.saturating_add(interval);
        if now_ms > target {
            // behind schedule, run now
            self.previous_ms = Some(now_ms);
            return 0;
        }
        self.previous_ms = Some(target);
        target - now_ms
    }
}

fn as_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn env() -> TimerEnv {
        let run = ActiveThreads::new();
        let group = ActiveThreads::child_of(run.clone());
        TimerEnv::new(run, group)
    }

    fn throughput(per_minute: f64, mode: ThroughputMode, env: TimerEnv) -> ConstantThroughputTimer {
        ConstantThroughputTimer::new(per_minute, mode, env)
    }

    #[test]
    fn per_thread_target_interval() {
        assert_eq!(
            throughput(60.0, ThroughputMode::PerThread, env()).calculate_current_target(0),
            1000
        );
        assert_eq!(
            throughput(60_000.0, ThroughputMode::PerThread, env()).calculate_current_target(0),
            1
        );
    }

    #[test]
    fn all_active_threads_scales_with_active_count() {
        let env = env();
        let guards: Vec<_> = (0..10).map(|_| env.group_threads.enter()).collect();
        let mut t = throughput(600.0, ThroughputMode::AllActiveThreads, env.clone());
        assert_eq!(t.calculate_current_target(0), 1000);
        drop(guards);

        let guards: Vec<_> = (0..1000).map(|_| env.group_threads.enter()).collect();
        let mut t = throughput(60_000_000.0, ThroughputMode::AllActiveThreads, env.clone());
        assert_eq!(t.calculate_current_target(0), 1);
        drop(guards);
    }

    #[test]
    fn per_thread_delay_keeps_schedule_and_catches_up() {
        let mut t = throughput(60.0, ThroughputMode::PerThread, env());
        assert_eq!(t.delay(0), 0);
        assert_eq!(t.delay(200), 800);
        // sample issued at 1000, next slot at 2000
        assert_eq!(t.delay(1500), 500);
        // far behind: no wait, schedule restarts from now
        assert_eq!(t.delay(10_000), 0);
        assert_eq!(t.delay(10_000), 1000);
    }

    #[test]
    fn shared_cursor_spreads_users() {
        let env = env();
        let mut a = throughput(600.0, ThroughputMode::AllActiveThreadsShared, env.clone());
        let mut b = throughput(600.0, ThroughputMode::AllActiveThreadsShared, env.clone());
        assert_eq!(a.delay(0), 0);
        assert_eq!(b.delay(0), 100);
        assert_eq!(a.delay(0), 200);
        // cursor never falls behind now
        assert_eq!(b.delay(5000), 0);
    }

    #[test]
    fn shared_mode_spans_groups_and_precise_stays_per_group() {
        let run = ActiveThreads::new();
        let run_cursor = Arc::new(ThroughputCursor::default());
        let group_env = || {
            TimerEnv::new(run.clone(), ActiveThreads::child_of(run.clone()))
                .with_run_cursor(run_cursor.clone())
        };
        let (g1, g2) = (group_env(), group_env());

        let mut a = throughput(600.0, ThroughputMode::AllActiveThreadsShared, g1.clone());
        let mut b = throughput(600.0, ThroughputMode::AllActiveThreadsShared, g2.clone());
        assert_eq!(a.delay(0), 0);
        assert_eq!(b.delay(0), 100);

        let mut c = throughput(600.0, ThroughputMode::AllActiveThreadsPrecise, g1);
        let mut d = throughput(600.0, ThroughputMode::AllActiveThreadsPrecise, g2);
        assert_eq!(c.delay(0), 0);
        assert_eq!(d.delay(0), 0);
    }

    #[test]
    fn precise_cursor_does_not_accumulate_rounding() {
        // 0.4 ms per request: rounded mode would schedule at 0 every time.
        let mut precise = throughput(150_000.0, ThroughputMode::AllActiveThreadsPrecise, env());
        let mut last = 0;
        for _ in 0..=1000 {
            last = precise.delay(0);
        }
        assert_eq!(last, 400);

        let mut shared = throughput(150_000.0, ThroughputMode::AllActiveThreadsShared, env());
        for _ in 0..=1000 {
            last = shared.delay(0);
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn uniform_jitter_is_sampled_once_per_iteration() {
        let rng = StdRng::seed_from_u64(7);
        let mut t = UniformRandomTimer::new(Duration::from_millis(100), Duration::from_millis(1000), rng);
        let first = t.delay(0);
        assert!((100..1100).contains(&first));
        assert_eq!(t.delay(50), first);

        let mut changed = false;
        for _ in 0..20 {
            t.iteration_start();
            let d = t.delay(0);
            assert!((100..1100).contains(&d));
            changed |= d != first;
        }
        assert!(changed);
    }

    fn sample_stats(mean: f64, n: usize) -> (f64, f64) {
        let mut rng = StdRng::seed_from_u64(42);
        let xs: Vec<f64> = (0..n).map(|_| poisson_sample(&mut rng, mean) as f64).collect();
        let m = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (n as f64 - 1.0);
        (m, var)
    }

    #[test]
    fn poisson_small_mean_uses_exact_regime() {
        let (m, var) = sample_stats(5.0, 20_000);
        assert!((m - 5.0).abs() < 0.15, "mean {m}");
        assert!((var - 5.0).abs() < 0.4, "variance {var}");
    }

    #[test]
    fn poisson_large_mean_uses_normal_regime() {
        let (m, var) = sample_stats(400.0, 20_000);
        assert!((m - 400.0).abs() < 1.0, "mean {m}");
        assert!((var - 400.0).abs() < 30.0, "variance {var}");
    }

    #[test]
    fn poisson_zero_mean_is_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(poisson_sample(&mut rng, 0.0), 0);
        let mut t = PoissonRandomTimer::new(Duration::from_millis(300), Duration::ZERO, rng);
        assert_eq!(t.delay(0), 300);
    }

    #[test]
    fn end_time_check() {
        assert!(exceeds_end_time(900, 200, Some(1000)));
        assert!(!exceeds_end_time(800, 200, Some(1000)));
        assert!(!exceeds_end_time(0, u64::MAX, None));
        assert!(!exceeds_end_time(u64::MAX, u64::MAX, None));
    }

    #[test]
    fn throughput_must_be_positive() {
        let spec = TimerSpec::ConstantThroughput {
            per_minute: 0.0,
            mode: ThroughputMode::PerThread,
        };
        assert!(matches!(spec.validate(), Err(Error::InvalidThroughput(_))));
    }
}
