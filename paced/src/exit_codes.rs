#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// Samples failed and `--fail-on-error` was given.
    SamplesFailed = 10,

    /// Invalid CLI flags or test plan (bad YAML, schedule syntax, group settings).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, failed listeners, task panics).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_failures(failures: u64, fail_on_error: bool) -> Self {
        if fail_on_error && failures > 0 {
            Self::SamplesFailed
        } else {
            Self::Success
        }
    }
}
