use std::sync::Arc;

/// Result of a single sampler call (or of a transaction wrapping several calls).
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub label: Arc<str>,
    pub success: bool,
    pub elapsed_ms: u64,
    pub response_code: String,
    pub response_message: String,
    pub sub_outcomes: Vec<SampleOutcome>,
    pub is_transaction_wrapper: bool,
    pub sent_bytes: u64,
    pub received_bytes: u64,
}

impl SampleOutcome {
    pub fn success(label: impl Into<Arc<str>>, elapsed_ms: u64) -> Self {
        Self {
            label: label.into(),
            success: true,
            elapsed_ms,
            response_code: "200".to_string(),
            response_message: "OK".to_string(),
            sub_outcomes: Vec::new(),
            is_transaction_wrapper: false,
            sent_bytes: 0,
            received_bytes: 0,
        }
    }

    pub fn failure(
        label: impl Into<Arc<str>>,
        elapsed_ms: u64,
        response_code: impl Into<String>,
        response_message: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            success: false,
            elapsed_ms,
            response_code: response_code.into(),
            response_message: response_message.into(),
            sub_outcomes: Vec::new(),
            is_transaction_wrapper: false,
            sent_bytes: 0,
            received_bytes: 0,
        }
    }

    #[must_use]
    pub fn with_bytes(mut self, sent: u64, received: u64) -> Self {
        self.sent_bytes = sent;
        self.received_bytes = received;
        self
    }

    #[must_use]
    pub fn with_response(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.response_code = code.into();
        self.response_message = message.into();
        self
    }

    /// A transaction wrapper that carries no sub-outcomes only summarizes samples
    /// which were already recorded on their own.
    pub fn is_summary_only_wrapper(&self) -> bool {
        self.is_transaction_wrapper && self.sub_outcomes.is_empty()
    }
}
