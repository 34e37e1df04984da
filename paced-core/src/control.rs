use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Flow-control request returned by a step and interpreted by the controller stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause(Duration),
    /// Finish the current sampler, then stop.
    Stop,
    /// Stop immediately, abandoning an in-flight sampler or sleep.
    StopNow,
    /// Abandon the current thread-group iteration and start the next one.
    RestartNextLoop,
    /// Skip to the next iteration of the innermost loop controller.
    StartNextIterationCurrentLoop,
    /// Leave the innermost loop controller.
    BreakCurrentLoop,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SignalTarget {
    #[default]
    ThisThread,
    WholeTest,
}

/// What a thread group does after a failed sample.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OnSampleError {
    #[default]
    Continue,
    StartNextLoop,
    StopThread,
    StopTest,
    StopTestNow,
}

#[derive(Debug, Default)]
pub struct StopSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

/// Run-wide stop requests observed by schedulers and virtual users.
#[derive(Debug, Default)]
pub struct RunControl {
    stop: StopSignal,
    stop_now: StopSignal,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graceful: users finish their current sampler, no new arrivals are issued.
    pub fn request_stop(&self) {
        self.stop.raise();
    }

    /// Users abandon in-flight samplers and sleeps.
    pub fn request_stop_now(&self) {
        self.stop.raise();
        self.stop_now.raise();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_raised()
    }

    pub fn is_stopping_now(&self) -> bool {
        self.stop_now.is_raised()
    }

    pub async fn stopped(&self) {
        self.stop.wait().await;
    }

    pub async fn stopped_now(&self) {
        self.stop_now.wait().await;
    }

    /// Sleeps until `deadline` unless a stop request arrives first.
    ///
    /// Returns `false` when the sleep was cut short.
    pub async fn sleep_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = self.stopped() => false,
        }
    }
}

/// Millisecond clock anchored at run start.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    started: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn now_ms(&self) -> u64 {
        self.ms_at(Instant::now())
    }

    pub fn ms_at(&self, at: Instant) -> u64 {
        let ms = at.saturating_duration_since(self.started).as_millis();
        u64::try_from(ms).unwrap_or(u64::MAX)
    }
}

/// Waits longer than this are treated as "never" by [`deadline_after`].
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + delay`, with `delay` capped at [`FAR_FUTURE`] so that arbitrarily
/// long pauses and schedules still map onto a representable instant.
pub fn deadline_after(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay.min(FAR_FUTURE)).unwrap_or(from)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stop_wakes_sleepers() {
        let control = Arc::new(RunControl::new());
        let c = control.clone();
        let sleeper = tokio::spawn(async move {
            c.sleep_until(Instant::now() + Duration::from_secs(3600)).await
        });

        tokio::task::yield_now().await;
        control.request_stop();

        let completed = sleeper.await.unwrap_or_else(|e| panic!("{e}"));
        assert!(!completed);
        assert!(control.is_stopping());
        assert!(!control.is_stopping_now());
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_sleep_ends_on_stop() {
        let control = Arc::new(RunControl::new());
        let c = control.clone();
        let sleeper = tokio::spawn(async move {
            c.sleep_until(deadline_after(Instant::now(), Duration::MAX)).await
        });

        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert!(!sleeper.is_finished());
        control.request_stop();

        let completed = sleeper.await.unwrap_or_else(|e| panic!("{e}"));
        assert!(!completed);
    }

    #[test]
    fn deadlines_are_capped() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wait_returns_when_already_raised() {
        let control = RunControl::new();
        control.request_stop_now();
        control.stopped_now().await;
        control.stopped().await;
    }

    #[test]
    fn policies_parse_from_snake_case() {
        assert_eq!(
            "stop_test_now".parse::<OnSampleError>().ok(),
            Some(OnSampleError::StopTestNow)
        );
        assert_eq!(
            "whole_test".parse::<SignalTarget>().ok(),
            Some(SignalTarget::WholeTest)
        );
    }
}
