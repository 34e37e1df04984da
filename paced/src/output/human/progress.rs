use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One stderr line tracking the whole run.
pub(crate) struct HumanProgress {
    expected: Option<Duration>,
    bar: Mutex<Option<ProgressBar>>,
}

impl HumanProgress {
    pub(crate) fn new(expected: Option<Duration>) -> Self {
        Self {
            expected,
            bar: Mutex::new(None),
        }
    }

    pub(crate) fn update(&self, elapsed: Duration, message: String) {
        let mut bar = self
            .bar
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pb = bar.get_or_insert_with(|| self.create_bar());
        pb.set_message(message);

        match self.expected {
            Some(total) => {
                pb.set_position(millis(elapsed).min(millis(total)));
            }
            None => pb.tick(),
        }
    }

    pub(crate) fn finish(&self) {
        let mut bar = self
            .bar
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pb) = bar.take() {
            pb.finish_and_clear();
        }
    }

    fn create_bar(&self) -> ProgressBar {
        let pb = match self.expected {
            Some(total) => {
                let pb = ProgressBar::new(millis(total));
                pb.set_style(bar_style());
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(spinner_style());
                pb.enable_steady_tick(Duration::from_millis(120));
                pb
            }
        };
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        pb.set_prefix("run");
        pb
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
