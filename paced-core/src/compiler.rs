//! Turns a [`TestPlan`] into one immutable [`ExecutionPlan`] per thread group.
//!
//! Config elements and timers are stored once in per-plan tables and referenced
//! by index from the steps that can see them. A level's configs and timers apply
//! to every descendant of that level; those placed under a sampler apply to that
//! sampler alone. Property lookups resolve nearest definition first.

use std::sync::Arc;

use crate::config_element::PreparedConfig;
use crate::control::OnSampleError;
use crate::error::{Error, Result};
use crate::listener::ThreadListener;
use crate::plan::{
    ClosedModel, ControllerKind, FlowAction, LoopCount, TestElement, TestPlan, ThreadGroup,
    ThreadGroupKind,
};
use crate::sampler::Sampler;
use crate::schedule::ThreadSchedule;
use crate::timer::{ThroughputCursor, TimerSpec};

pub(crate) type ConfigId = usize;
pub(crate) type TimerId = usize;

#[derive(Debug)]
pub(crate) struct TimerSlot {
    pub(crate) spec: TimerSpec,
    /// Shared by every user of the group.
    pub(crate) cursor: Arc<ThroughputCursor>,
}

#[derive(Debug)]
pub(crate) enum Step {
    Controller(ControllerStep),
    Sampler(SamplerStep),
    Action(FlowAction),
}

#[derive(Debug)]
pub(crate) struct ControllerStep {
    pub(crate) name: Arc<str>,
    pub(crate) kind: ControllerKind,
    pub(crate) children: Vec<Step>,
    /// Applied at the start of every pass.
    pub(crate) own_configs: Vec<ConfigId>,
}

#[derive(Debug)]
pub(crate) struct SamplerStep {
    pub(crate) label: Arc<str>,
    pub(crate) sampler: Arc<dyn Sampler>,
    /// Every config visible to the sampler, nearest first.
    pub(crate) configs: Vec<ConfigId>,
    pub(crate) own_configs: Vec<ConfigId>,
    pub(crate) timers: Vec<TimerId>,
}

/// Static, pre-resolved step tree of one thread group.
///
/// Shared read-only by every user of the group; each user materializes its
/// own copies of the config and timer tables.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub(crate) group: Arc<str>,
    pub(crate) on_sample_error: OnSampleError,
    pub(crate) root: Vec<Step>,
    /// Group and plan level configs, outermost first.
    pub(crate) root_configs: Vec<ConfigId>,
    pub(crate) configs: Vec<Arc<PreparedConfig>>,
    pub(crate) timers: Vec<TimerSlot>,
    pub(crate) listeners: Vec<Arc<dyn ThreadListener>>,
}

impl ExecutionPlan {
    pub fn group(&self) -> &Arc<str> {
        &self.group
    }

    pub fn on_sample_error(&self) -> OnSampleError {
        self.on_sample_error
    }

    pub fn config_count(&self) -> usize {
        self.configs.len()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn sampler_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|s| match s {
                    Step::Sampler(_) => 1,
                    Step::Controller(c) => count(&c.children),
                    Step::Action(_) => 0,
                })
                .sum()
        }
        count(&self.root)
    }
}

/// How a compiled group starts its users.
#[derive(Debug, Clone)]
pub enum GroupModel {
    Closed(ClosedModel),
    Open {
        schedule: ThreadSchedule,
        random_seed: u64,
    },
}

#[derive(Debug, Clone)]
pub struct CompiledGroup {
    pub name: Arc<str>,
    pub model: GroupModel,
    pub plan: Arc<ExecutionPlan>,
}

#[derive(Debug, Clone)]
pub struct CompiledPlan {
    pub name: String,
    pub groups: Vec<CompiledGroup>,
}

/// Validates and resolves a whole test plan.
///
/// Every failure that could stop a run partway (bad schedule, config that cannot
/// be cloned per user, invalid group settings) is reported here instead.
pub fn compile(plan: &TestPlan) -> Result<CompiledPlan> {
    if plan.groups.is_empty() {
        return Err(Error::EmptyPlan);
    }

    let shared = PlanLevel::collect(&plan.elements)?;

    let groups = plan
        .groups
        .iter()
        .map(|group| compile_group(group, &shared))
        .collect::<Result<Vec<_>>>()?;

    Ok(CompiledPlan {
        name: plan.name.clone(),
        groups,
    })
}

/// Plan-level elements, prepared once and seen by every group.
struct PlanLevel {
    configs: Vec<Arc<PreparedConfig>>,
    timers: Vec<TimerSpec>,
    listeners: Vec<Arc<dyn ThreadListener>>,
}

impl PlanLevel {
    fn collect(elements: &[TestElement]) -> Result<Self> {
        let mut out = Self {
            configs: Vec::new(),
            timers: Vec::new(),
            listeners: Vec::new(),
        };
        for element in elements {
            match element {
                TestElement::Config { name, element } => out
                    .configs
                    .push(Arc::new(PreparedConfig::prepare(name.clone(), element.clone())?)),
                TestElement::Timer(spec) => {
                    spec.validate()?;
                    out.timers.push(spec.clone());
                }
                TestElement::Listener(l) => out.listeners.push(l.clone()),
                other => {
                    return Err(Error::MisplacedElement {
                        element: element_kind(other),
                        parent: "the test plan".to_string(),
                    });
                }
            }
        }
        Ok(out)
    }
}

fn compile_group(group: &ThreadGroup, shared: &PlanLevel) -> Result<CompiledGroup> {
    let model = match &group.kind {
        ThreadGroupKind::Closed(m) => {
            validate_closed(&group.name, m)?;
            GroupModel::Closed(m.clone())
        }
        ThreadGroupKind::Open(m) => {
            let schedule = m
                .schedule
                .parse::<ThreadSchedule>()
                .map_err(|source| Error::Schedule {
                    group: group.name.to_string(),
                    source,
                })?;
            GroupModel::Open {
                schedule,
                random_seed: m.random_seed,
            }
        }
    };

    let mut builder = Builder::default();

    let mut root_scope: Vec<ConfigId> = Vec::new();
    for config in &shared.configs {
        root_scope.push(builder.push_config(config.clone()));
    }
    let mut root_timers: Vec<TimerId> = Vec::new();
    for spec in &shared.timers {
        root_timers.push(builder.push_timer(spec.clone()));
    }
    builder.listeners.extend(shared.listeners.iter().cloned());

    let (root, group_configs) = builder.level(&group.elements, &root_scope, &root_timers)?;

    let mut root_configs = root_scope;
    root_configs.extend(group_configs);

    Ok(CompiledGroup {
        name: group.name.clone(),
        model,
        plan: Arc::new(ExecutionPlan {
            group: group.name.clone(),
            on_sample_error: group.on_sample_error,
            root,
            root_configs,
            configs: builder.configs,
            timers: builder.timers,
            listeners: builder.listeners,
        }),
    })
}

fn validate_closed(name: &str, m: &ClosedModel) -> Result<()> {
    if m.threads == 0 {
        return Err(Error::InvalidThreads(name.to_string()));
    }
    if m.loops == LoopCount::Finite(0) {
        return Err(Error::InvalidLoops(name.to_string()));
    }
    if m.duration.is_some_and(|d| d.is_zero()) {
        return Err(Error::InvalidDuration(name.to_string()));
    }
    if m.loops == LoopCount::Infinite && m.duration.is_none() {
        return Err(Error::Unbounded(name.to_string()));
    }
    Ok(())
}

#[derive(Default)]
struct Builder {
    configs: Vec<Arc<PreparedConfig>>,
    timers: Vec<TimerSlot>,
    listeners: Vec<Arc<dyn ThreadListener>>,
}

impl Builder {
    fn push_config(&mut self, config: Arc<PreparedConfig>) -> ConfigId {
        self.configs.push(config);
        self.configs.len() - 1
    }

    fn push_timer(&mut self, spec: TimerSpec) -> TimerId {
        self.timers.push(TimerSlot {
            spec,
            cursor: Arc::new(ThroughputCursor::default()),
        });
        self.timers.len() - 1
    }

    /// Registers the configs, timers and listeners declared directly in
    /// `elements`, in declaration order.
    fn scoped_elements(
        &mut self,
        elements: &[TestElement],
        own_configs: &mut Vec<ConfigId>,
        timers: &mut Vec<TimerId>,
    ) -> Result<()> {
        for element in elements {
            match element {
                TestElement::Config { name, element } => {
                    let prepared = PreparedConfig::prepare(name.clone(), element.clone())?;
                    own_configs.push(self.push_config(Arc::new(prepared)));
                }
                TestElement::Timer(spec) => {
                    spec.validate()?;
                    timers.push(self.push_timer(spec.clone()));
                }
                TestElement::Listener(l) => self.listeners.push(l.clone()),
                TestElement::Controller { .. }
                | TestElement::Sampler { .. }
                | TestElement::Action(_) => {}
            }
        }
        Ok(())
    }

    /// Compiles one level of the tree and returns its steps and its own configs.
    fn level(
        &mut self,
        elements: &[TestElement],
        outer_configs: &[ConfigId],
        outer_timers: &[TimerId],
    ) -> Result<(Vec<Step>, Vec<ConfigId>)> {
        let mut own_configs = Vec::new();
        let mut timers = outer_timers.to_vec();
        self.scoped_elements(elements, &mut own_configs, &mut timers)?;

        let mut visible = own_configs.clone();
        visible.extend_from_slice(outer_configs);

        let mut steps = Vec::new();
        for element in elements {
            match element {
                TestElement::Controller {
                    name,
                    kind,
                    children,
                } => {
                    let (children, own) = self.level(children, &visible, &timers)?;
                    steps.push(Step::Controller(ControllerStep {
                        name: name.clone(),
                        kind: *kind,
                        children,
                        own_configs: own,
                    }));
                }
                TestElement::Sampler {
                    label,
                    sampler,
                    children,
                } => {
                    if let Some(bad) = children.iter().find(|c| {
                        matches!(
                            c,
                            TestElement::Controller { .. }
                                | TestElement::Sampler { .. }
                                | TestElement::Action(_)
                        )
                    }) {
                        return Err(Error::MisplacedElement {
                            element: element_kind(bad),
                            parent: format!("sampler `{label}`"),
                        });
                    }

                    let mut sampler_configs = Vec::new();
                    let mut sampler_timers = timers.clone();
                    self.scoped_elements(children, &mut sampler_configs, &mut sampler_timers)?;

                    let mut configs = sampler_configs.clone();
                    configs.extend_from_slice(&visible);

                    steps.push(Step::Sampler(SamplerStep {
                        label: label.clone(),
                        sampler: sampler.clone(),
                        configs,
                        own_configs: sampler_configs,
                        timers: sampler_timers,
                    }));
                }
                TestElement::Action(action) => steps.push(Step::Action(*action)),
                TestElement::Timer(_) | TestElement::Config { .. } | TestElement::Listener(_) => {}
            }
        }

        Ok((steps, own_configs))
    }
}

fn element_kind(e: &TestElement) -> &'static str {
    match e {
        TestElement::Controller { .. } => "a controller",
        TestElement::Sampler { .. } => "a sampler",
        TestElement::Timer(_) => "a timer",
        TestElement::Config { .. } => "a config element",
        TestElement::Listener(_) => "a listener",
        TestElement::Action(_) => "a flow-control action",
    }
}
