use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use paced_core::metrics::SampleOutcome;
use paced_core::{SampleContext, Sampler, SamplerError};
use tokio::time::Instant;

/// Simulated request: waits `latency` and reports a canned response.
///
/// `${var}` references in the response message are resolved per call.
#[derive(Debug, Clone)]
pub struct DummySampler {
    pub latency: Duration,
    pub success: bool,
    pub response_code: String,
    pub response_message: String,
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

impl Default for DummySampler {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            success: true,
            response_code: "200".to_string(),
            response_message: "OK".to_string(),
            sent_bytes: 0,
            received_bytes: 0,
        }
    }
}

#[async_trait]
impl Sampler for DummySampler {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleOutcome, SamplerError> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut outcome = SampleOutcome::success(ctx.label.clone(), elapsed_ms)
            .with_response(
                self.response_code.clone(),
                ctx.variables.substitute(&self.response_message),
            )
            .with_bytes(self.sent_bytes, self.received_bytes);
        outcome.success = self.success;
        Ok(outcome)
    }
}

/// Echoes the caller's variables and sampler properties into the response message.
#[derive(Debug, Clone, Default)]
pub struct DebugSampler;

#[async_trait]
impl Sampler for DebugSampler {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleOutcome, SamplerError> {
        let mut message = String::new();
        writeln!(message, "thread={} iteration={}", ctx.thread.name, ctx.iteration).ok();
        for (name, value) in ctx.variables.sorted() {
            writeln!(message, "{name}={value}").ok();
        }

        let mut props: Vec<_> = ctx.properties.iter().collect();
        props.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in props {
            writeln!(message, "property.{name}={value}").ok();
        }

        let received = message.len() as u64;
        Ok(SampleOutcome::success(ctx.label.clone(), 0)
            .with_response("200", message)
            .with_bytes(0, received))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use paced_core::{Properties, ThreadInfo, Value, Variables};

    use super::*;

    fn call<'a>(
        label: &'a Arc<str>,
        thread: &'a ThreadInfo,
        vars: &'a mut Variables,
        props: &'a Properties,
    ) -> SampleContext<'a> {
        SampleContext {
            label,
            thread,
            iteration: 2,
            variables: vars,
            properties: props,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dummy_waits_and_reports_configured_response() {
        let sampler = DummySampler {
            latency: Duration::from_millis(40),
            success: false,
            response_code: "503".to_string(),
            response_message: "busy ${user}".to_string(),
            sent_bytes: 10,
            received_bytes: 99,
        };
        let label: Arc<str> = Arc::from("login");
        let thread = ThreadInfo::new(Arc::from("g"), 0);
        let mut vars = Variables::new();
        vars.set("user", "bob");
        let props = Properties::default();

        let out = sampler
            .sample(&mut call(&label, &thread, &mut vars, &props))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(!out.success);
        assert_eq!(out.elapsed_ms, 40);
        assert_eq!(out.response_code, "503");
        assert_eq!(out.response_message, "busy bob");
        assert_eq!((out.sent_bytes, out.received_bytes), (10, 99));
    }

    #[tokio::test]
    async fn debug_echoes_variables_and_properties() {
        let label: Arc<str> = Arc::from("dbg");
        let thread = ThreadInfo::new(Arc::from("g"), 1);
        let mut vars = Variables::new();
        vars.set("b", 2i64);
        vars.set("a", "x");
        let mut props = Properties::default();
        props.insert(Arc::from("host"), Value::from("example.test"));

        let out = DebugSampler
            .sample(&mut call(&label, &thread, &mut vars, &props))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            out.response_message,
            "thread=g 2 iteration=2\na=x\nb=2\nproperty.host=example.test\n"
        );
        assert!(out.success);
    }
}
