pub mod agg;
mod histogram;
mod outcome;
mod registry;
mod sampler_metric;
mod window;

pub use agg::{RunningStats, per_sec};
pub use histogram::{CumulativeStats, LabelSummary, LatencySummary};
pub use outcome::SampleOutcome;
pub use registry::{ALL_LABEL, MetricsRegistry};
pub use sampler_metric::{
    ErrorKey, MetricSnapshot, MetricsConfig, SamplerMetric, WindowMode, WindowStats,
};
pub use window::{SlidingWindow, percentile_of_sorted};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),
}
