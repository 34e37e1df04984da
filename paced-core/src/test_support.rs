use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paced_metrics::SampleOutcome;
use parking_lot::Mutex;

use crate::plan::TestElement;
use crate::sampler::{SampleContext, Sampler, SamplerError};

#[derive(Debug, Clone)]
enum FixedResult {
    Ok,
    Failing(String),
    Error(String),
}

/// Sleeps for a fixed time, then succeeds, fails or errors.
#[derive(Debug, Clone)]
pub(crate) struct Fixed {
    elapsed: Duration,
    result: FixedResult,
}

impl Fixed {
    pub(crate) fn ok(ms: u64) -> Self {
        Self {
            elapsed: Duration::from_millis(ms),
            result: FixedResult::Ok,
        }
    }

    pub(crate) fn failing(ms: u64, code: &str) -> Self {
        Self {
            elapsed: Duration::from_millis(ms),
            result: FixedResult::Failing(code.to_string()),
        }
    }

    pub(crate) fn error(code: &str) -> Self {
        Self {
            elapsed: Duration::ZERO,
            result: FixedResult::Error(code.to_string()),
        }
    }
}

#[async_trait]
impl Sampler for Fixed {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleOutcome, SamplerError> {
        if !self.elapsed.is_zero() {
            tokio::time::sleep(self.elapsed).await;
        }
        let ms = self.elapsed.as_millis() as u64;
        match &self.result {
            FixedResult::Ok => Ok(SampleOutcome::success(ctx.label.clone(), ms)),
            FixedResult::Failing(code) => Ok(SampleOutcome::failure(
                ctx.label.clone(),
                ms,
                code.clone(),
                "failed",
            )),
            FixedResult::Error(code) => Err(SamplerError::new(code.clone(), "no response")),
        }
    }
}

#[derive(Debug, Clone)]
struct Call {
    label: String,
    iteration: u64,
}

/// Remembers every call made through the samplers it hands out.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
}

#[derive(Debug)]
struct Recording {
    calls: Arc<Mutex<Vec<Call>>>,
}

#[async_trait]
impl Sampler for Recording {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleOutcome, SamplerError> {
        self.calls.lock().push(Call {
            label: ctx.label.to_string(),
            iteration: ctx.iteration,
        });
        Ok(SampleOutcome::success(ctx.label.clone(), 0))
    }
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sampler(&self, label: &str) -> TestElement {
        TestElement::sampler(
            label,
            Arc::new(Recording {
                calls: self.calls.clone(),
            }),
        )
    }

    pub(crate) fn labels(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.label.clone()).collect()
    }

    pub(crate) fn iterations(&self) -> Vec<u64> {
        self.calls.lock().iter().map(|c| c.iteration).collect()
    }
}
