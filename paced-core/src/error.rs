use crate::schedule::ScheduleError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("metrics error: {0}")]
    Metrics(#[from] paced_metrics::MetricsError),

    #[error("test plan has no thread groups")]
    EmptyPlan,

    #[error("thread group `{group}`: invalid schedule: {source}")]
    Schedule {
        group: String,
        #[source]
        source: ScheduleError,
    },

    #[error("thread group `{0}`: `threads` must be a positive integer")]
    InvalidThreads(String),

    #[error("thread group `{0}`: `loops` must be a positive integer or infinite")]
    InvalidLoops(String),

    #[error("thread group `{0}`: `duration` must be a positive duration")]
    InvalidDuration(String),

    #[error("thread group `{0}` would never stop: set `loops` or `duration`")]
    Unbounded(String),

    #[error("throughput timer requires a positive throughput, got {0}")]
    InvalidThroughput(f64),

    #[error("counter `{0}`: `increment` must not be zero")]
    InvalidCounter(String),

    #[error("config element `{name}` cannot be cloned per thread: {reason}")]
    ConfigNotCloneable { name: String, reason: String },

    #[error("{element} is not allowed under {parent}")]
    MisplacedElement {
        element: &'static str,
        parent: String,
    },

    #[error("`report_interval` must be a positive duration")]
    InvalidReportInterval,

    #[error("thread listener failed: {0}")]
    Listener(String),
}
