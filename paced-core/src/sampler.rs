use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use paced_metrics::SampleOutcome;

use crate::value::{Value, Variables};

/// Identity of one virtual user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub group: Arc<str>,
    /// 0-based number within the thread group.
    pub thread_num: u64,
    pub name: Arc<str>,
}

impl ThreadInfo {
    pub fn new(group: Arc<str>, thread_num: u64) -> Self {
        let name = Arc::from(format!("{group} {}", thread_num + 1));
        Self {
            group,
            thread_num,
            name,
        }
    }
}

/// Config properties visible to a sampler, nearest definition first.
pub type Properties = ahash::AHashMap<Arc<str>, Value>;

/// Everything a sampler may look at during one call.
///
/// Borrowed for the duration of [`Sampler::sample`] only.
#[derive(Debug)]
pub struct SampleContext<'a> {
    pub label: &'a Arc<str>,
    pub thread: &'a ThreadInfo,
    /// 0-based thread-group iteration.
    pub iteration: u64,
    pub variables: &'a mut Variables,
    pub properties: &'a Properties,
}

impl SampleContext<'_> {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn property_str(&self, name: &str) -> Option<String> {
        self.properties.get(name).map(|v| v.to_string())
    }
}

/// A sampler call that produced no response at all.
///
/// Recorded as a failed outcome carrying `code` and `message`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct SamplerError {
    pub code: String,
    pub message: String,
}

impl SamplerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub(crate) fn into_outcome(self, label: Arc<str>, elapsed_ms: u64) -> SampleOutcome {
        SampleOutcome::failure(label, elapsed_ms, self.code, self.message)
    }
}

/// Produces one request and reports how it went.
///
/// Implementations are shared by every user of a thread group.
#[async_trait]
pub trait Sampler: Send + Sync + fmt::Debug {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleOutcome, SamplerError>;
}
