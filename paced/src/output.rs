use std::path::Path;
use std::time::Duration;

use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan_path: &Path, plan: &paced_core::TestPlan);
    fn progress(&self) -> Option<paced_core::ProgressFn>;
    fn print_summary(&self, summary: &paced_core::RunSummary) -> anyhow::Result<()>;
}

/// `expected` sizes the human progress bar; `None` shows a spinner.
pub(crate) fn formatter(
    format: OutputFormat,
    expected: Option<Duration>,
) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new(expected)),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
