use std::sync::Arc;
use std::time::Duration;

use crate::config_element::ConfigElement;
use crate::control::{ControlSignal, OnSampleError, SignalTarget};
use crate::listener::ThreadListener;
use crate::sampler::Sampler;
use crate::timer::TimerSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    Finite(u64),
    Infinite,
}

impl LoopCount {
    pub(crate) fn allows(self, completed: u64) -> bool {
        match self {
            Self::Finite(n) => completed < n,
            Self::Infinite => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    /// Groups children for scoping only.
    Simple,
    Loop { count: LoopCount },
    /// Times its children as one sample labelled with the controller name.
    ///
    /// With `generate_parent_sample` the children are recorded only inside the
    /// wrapper; otherwise they are recorded individually and the wrapper only
    /// summarizes them.
    Transaction { generate_parent_sample: bool },
}

/// A step that returns a control signal when reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowAction {
    pub signal: ControlSignal,
    pub target: SignalTarget,
}

#[derive(Debug, Clone)]
pub enum TestElement {
    Controller {
        name: Arc<str>,
        kind: ControllerKind,
        children: Vec<TestElement>,
    },
    /// Configs and timers among `children` apply to this sampler only.
    Sampler {
        label: Arc<str>,
        sampler: Arc<dyn Sampler>,
        children: Vec<TestElement>,
    },
    Timer(TimerSpec),
    Config {
        name: Arc<str>,
        element: ConfigElement,
    },
    Listener(Arc<dyn ThreadListener>),
    Action(FlowAction),
}

impl TestElement {
    pub fn sampler(label: impl Into<Arc<str>>, sampler: Arc<dyn Sampler>) -> Self {
        Self::Sampler {
            label: label.into(),
            sampler,
            children: Vec::new(),
        }
    }

    pub fn controller(
        name: impl Into<Arc<str>>,
        kind: ControllerKind,
        children: Vec<TestElement>,
    ) -> Self {
        Self::Controller {
            name: name.into(),
            kind,
            children,
        }
    }

    pub fn config(name: impl Into<Arc<str>>, element: ConfigElement) -> Self {
        Self::Config {
            name: name.into(),
            element,
        }
    }

    pub fn action(signal: ControlSignal, target: SignalTarget) -> Self {
        Self::Action(FlowAction { signal, target })
    }

    /// Adds a scoped child to a sampler or controller; other elements are returned unchanged.
    #[must_use]
    pub fn with_child(mut self, child: TestElement) -> Self {
        match &mut self {
            Self::Sampler { children, .. } | Self::Controller { children, .. } => {
                children.push(child);
            }
            _ => {}
        }
        self
    }
}

/// Fixed population of users, each looping over the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedModel {
    pub threads: u64,
    pub ramp_up: Duration,
    pub loops: LoopCount,
    /// Per-user end time measured from group start (after `start_delay`).
    pub duration: Option<Duration>,
    pub start_delay: Duration,
}

impl Default for ClosedModel {
    fn default() -> Self {
        Self {
            threads: 1,
            ramp_up: Duration::ZERO,
            loops: LoopCount::Finite(1),
            duration: None,
            start_delay: Duration::ZERO,
        }
    }
}

/// Users arriving on a timeline, each running the tree once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenModel {
    pub schedule: String,
    /// 0 draws a fresh seed for every run.
    pub random_seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadGroupKind {
    Closed(ClosedModel),
    Open(OpenModel),
}

#[derive(Debug, Clone)]
pub struct ThreadGroup {
    pub name: Arc<str>,
    pub kind: ThreadGroupKind,
    pub on_sample_error: OnSampleError,
    pub elements: Vec<TestElement>,
}

impl ThreadGroup {
    pub fn closed(name: impl Into<Arc<str>>, model: ClosedModel, elements: Vec<TestElement>) -> Self {
        Self {
            name: name.into(),
            kind: ThreadGroupKind::Closed(model),
            on_sample_error: OnSampleError::Continue,
            elements,
        }
    }

    pub fn open(name: impl Into<Arc<str>>, model: OpenModel, elements: Vec<TestElement>) -> Self {
        Self {
            name: name.into(),
            kind: ThreadGroupKind::Open(model),
            on_sample_error: OnSampleError::Continue,
            elements,
        }
    }

    #[must_use]
    pub fn with_on_sample_error(mut self, policy: OnSampleError) -> Self {
        self.on_sample_error = policy;
        self
    }
}

/// A whole test: plan-level elements apply to every thread group.
#[derive(Debug, Clone, Default)]
pub struct TestPlan {
    pub name: String,
    pub elements: Vec<TestElement>,
    pub groups: Vec<ThreadGroup>,
}
