use std::sync::Arc;
use std::time::Duration;

use paced_metrics::{MetricsRegistry, SampleOutcome};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::compiler::{ConfigId, ControllerStep, ExecutionPlan, SamplerStep, Step};
use crate::control::{
    ControlSignal, OnSampleError, RunClock, RunControl, SignalTarget, deadline_after,
};
use crate::error::{Error, Result};
use crate::listener::{ListenerHook, notify_listeners};
use crate::plan::{ControllerKind, FlowAction, LoopCount};
use crate::sampler::{SampleContext, ThreadInfo};
use crate::scope::ThreadScope;
use crate::timer::{TimerEnv, exceeds_end_time};
use crate::value::Variables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum VuState {
    New,
    Running,
    Paused,
    Stopping,
    Finished,
}

/// What one user did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VuReport {
    pub samples: u64,
    pub iterations: u64,
}

/// Run state shared by every user of a thread group.
#[derive(Debug)]
pub(crate) struct GroupContext {
    pub(crate) plan: Arc<ExecutionPlan>,
    pub(crate) registry: Arc<MetricsRegistry>,
    pub(crate) control: Arc<RunControl>,
    pub(crate) clock: RunClock,
    pub(crate) env: TimerEnv,
    pub(crate) seed: Option<u64>,
}

/// How the step tree was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    NextIteration,
    BreakLoop,
    RestartThreadLoop,
    Stop,
    StopNow,
}

#[derive(Debug)]
enum FrameKind<'p> {
    Root,
    Simple,
    Loop {
        count: LoopCount,
        completed: u64,
    },
    Transaction {
        name: &'p Arc<str>,
        generate_parent_sample: bool,
        subs: Vec<SampleOutcome>,
    },
}

#[derive(Debug)]
struct Frame<'p> {
    steps: &'p [Step],
    next: usize,
    own_configs: &'p [ConfigId],
    kind: FrameKind<'p>,
}

enum Next<'p> {
    Step(&'p Step),
    Repeat,
    Finished,
}

/// One simulated user: owns its variables and scope, runs the group's plan.
#[derive(Debug)]
pub(crate) struct VirtualUser {
    ctx: Arc<GroupContext>,
    thread: ThreadInfo,
    loops: LoopCount,
    end_time_ms: Option<u64>,
    state: VuState,
    vars: Variables,
    scope: ThreadScope,
    iteration: u64,
    samples: u64,
}

impl VirtualUser {
    /// Clones the plan's config elements and timers for this user.
    pub(crate) fn new(
        ctx: Arc<GroupContext>,
        thread_num: u64,
        loops: LoopCount,
        end_time_ms: Option<u64>,
    ) -> Result<Self> {
        let scope = ThreadScope::materialize(&ctx.plan, &ctx.env, ctx.seed, thread_num)?;
        Ok(Self {
            thread: ThreadInfo::new(ctx.plan.group.clone(), thread_num),
            ctx,
            loops,
            end_time_ms,
            state: VuState::New,
            vars: Variables::new(),
            scope,
            iteration: 0,
            samples: 0,
        })
    }

    pub(crate) async fn run(mut self) -> Result<VuReport> {
        let _active = self.ctx.env.group_threads.enter();
        let plan = self.ctx.plan.clone();
        let control = self.ctx.control.clone();

        self.set_state(VuState::Running);
        let started = notify_listeners(&plan.listeners, &self.thread, ListenerHook::ThreadStarted);
        if started.is_ok() {
            self.run_iterations(&plan, &control).await;
        }

        self.set_state(VuState::Stopping);
        let finished =
            notify_listeners(&plan.listeners, &self.thread, ListenerHook::ThreadFinished);
        self.set_state(VuState::Finished);

        started
            .and(finished)
            .map_err(|e| Error::Listener(e.to_string()))?;
        Ok(VuReport {
            samples: self.samples,
            iterations: self.iteration,
        })
    }

    fn set_state(&mut self, state: VuState) {
        if self.state != state {
            debug!(thread = %self.thread.name, from = %self.state, to = %state, "virtual user state");
            self.state = state;
        }
    }

    async fn run_iterations(&mut self, plan: &ExecutionPlan, control: &RunControl) {
        while self.loops.allows(self.iteration) {
            if self.interrupted(control).is_some() {
                break;
            }

            self.scope.group_iteration_started();
            self.scope.apply(&plan.root_configs, &mut self.vars);
            let flow = self.run_steps(plan, control).await;
            self.iteration += 1;

            match flow {
                None | Some(Flow::RestartThreadLoop) => tokio::task::yield_now().await,
                Some(flow) => {
                    debug!(thread = %self.thread.name, ?flow, "leaving thread loop");
                    break;
                }
            }
        }
    }

    /// Stop condition observed at a step boundary.
    fn interrupted(&self, control: &RunControl) -> Option<Flow> {
        if control.is_stopping_now() {
            return Some(Flow::StopNow);
        }
        if control.is_stopping() || self.past_end_time() {
            return Some(Flow::Stop);
        }
        None
    }

    fn past_end_time(&self) -> bool {
        exceeds_end_time(self.ctx.clock.now_ms(), 0, self.end_time_ms)
    }

    /// Executes one thread-group iteration.
    ///
    /// Returns `None` when every step ran, otherwise the signal that ended it.
    async fn run_steps(&mut self, plan: &ExecutionPlan, control: &RunControl) -> Option<Flow> {
        let mut stack = vec![Frame {
            steps: &plan.root,
            next: 0,
            own_configs: &[],
            kind: FrameKind::Root,
        }];

        loop {
            let next = {
                let top = stack.last_mut()?;
                let steps = top.steps;
                match steps.get(top.next) {
                    Some(step) => {
                        top.next += 1;
                        Next::Step(step)
                    }
                    None => match &mut top.kind {
                        FrameKind::Loop { count, completed } => {
                            *completed += 1;
                            if count.allows(*completed) {
                                Next::Repeat
                            } else {
                                Next::Finished
                            }
                        }
                        _ => Next::Finished,
                    },
                }
            };

            let signal = match next {
                Next::Finished => {
                    if let Some(frame) = stack.pop() {
                        self.finish_frame(frame, &mut stack);
                    }
                    None
                }
                Next::Repeat => match self.interrupted(control) {
                    Some(flow) => Some(flow),
                    None => {
                        if let Some(top) = stack.last_mut() {
                            top.next = 0;
                            self.scope.apply(top.own_configs, &mut self.vars);
                        }
                        tokio::task::yield_now().await;
                        None
                    }
                },
                Next::Step(Step::Controller(c)) => {
                    self.enter_controller(c, &mut stack);
                    None
                }
                Next::Step(Step::Sampler(s)) => self.run_sampler(s, control, &mut stack).await,
                Next::Step(Step::Action(a)) => self.run_action(*a, control).await,
            };

            if let Some(flow) = signal
                && let Some(done) = self.unwind(flow, &mut stack)
            {
                return Some(done);
            }
        }
    }

    fn enter_controller<'p>(&mut self, c: &'p ControllerStep, stack: &mut Vec<Frame<'p>>) {
        let kind = match c.kind {
            ControllerKind::Simple => FrameKind::Simple,
            ControllerKind::Loop { count } => {
                if !count.allows(0) {
                    return;
                }
                FrameKind::Loop {
                    count,
                    completed: 0,
                }
            }
            ControllerKind::Transaction {
                generate_parent_sample,
            } => FrameKind::Transaction {
                name: &c.name,
                generate_parent_sample,
                subs: Vec::new(),
            },
        };

        self.scope.apply(&c.own_configs, &mut self.vars);
        stack.push(Frame {
            steps: &c.children,
            next: 0,
            own_configs: &c.own_configs,
            kind,
        });
    }

    /// Pops frames for `flow`. Returns the flow that ends the iteration, or
    /// `None` when execution resumes inside the stack.
    fn unwind(&self, flow: Flow, stack: &mut Vec<Frame<'_>>) -> Option<Flow> {
        match flow {
            Flow::NextIteration | Flow::BreakLoop => {
                while let Some(top) = stack.last_mut() {
                    if matches!(top.kind, FrameKind::Loop { .. }) {
                        if flow == Flow::NextIteration {
                            top.next = top.steps.len();
                        } else if let Some(frame) = stack.pop() {
                            self.finish_frame(frame, stack);
                        }
                        return None;
                    }
                    if let Some(frame) = stack.pop() {
                        self.finish_frame(frame, stack);
                    }
                }
                // The thread-group loop is the outermost loop.
                Some(if flow == Flow::NextIteration {
                    Flow::RestartThreadLoop
                } else {
                    Flow::Stop
                })
            }
            Flow::RestartThreadLoop | Flow::Stop | Flow::StopNow => {
                while let Some(frame) = stack.pop() {
                    self.finish_frame(frame, stack);
                }
                Some(flow)
            }
        }
    }

    fn finish_frame(&self, frame: Frame<'_>, stack: &mut [Frame<'_>]) {
        if let FrameKind::Transaction {
            name,
            generate_parent_sample,
            subs,
        } = frame.kind
            && !subs.is_empty()
        {
            let wrapper = transaction_outcome(name, subs, generate_parent_sample);
            self.record(wrapper, stack);
        }
    }

    /// Hands `outcome` to the nearest enclosing transaction and/or the registry.
    fn record(&self, outcome: SampleOutcome, stack: &mut [Frame<'_>]) {
        let tx = stack.iter_mut().rev().find_map(|f| match &mut f.kind {
            FrameKind::Transaction {
                generate_parent_sample,
                subs,
                ..
            } => Some((*generate_parent_sample, subs)),
            _ => None,
        });

        match tx {
            Some((true, subs)) => subs.push(outcome),
            Some((false, subs)) => {
                self.ctx.registry.add(&outcome);
                subs.push(outcome);
            }
            None => self.ctx.registry.add(&outcome),
        }
    }

    async fn run_sampler(
        &mut self,
        step: &SamplerStep,
        control: &RunControl,
        stack: &mut [Frame<'_>],
    ) -> Option<Flow> {
        if let Some(flow) = self.interrupted(control) {
            return Some(flow);
        }
        self.scope.apply(&step.own_configs, &mut self.vars);

        let now = self.ctx.clock.now_ms();
        let delay = self.scope.total_delay(&step.timers, now);
        if exceeds_end_time(now, delay, self.end_time_ms) {
            debug!(thread = %self.thread.name, delay_ms = delay, "timer delay passes end time");
            return Some(Flow::Stop);
        }
        if delay > 0
            && !control
                .sleep_until(deadline_after(Instant::now(), Duration::from_millis(delay)))
                .await
        {
            return Some(stop_flow(control));
        }

        let label = self.vars.substitute_arc(&step.label);
        let properties = self.scope.properties(&step.configs, &self.vars);
        let started = Instant::now();
        let result = {
            let mut ctx = SampleContext {
                label: &label,
                thread: &self.thread,
                iteration: self.iteration,
                variables: &mut self.vars,
                properties: &properties,
            };
            tokio::select! {
                biased;
                _ = control.stopped_now() => None,
                r = step.sampler.sample(&mut ctx) => Some(r),
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let Some(result) = result else {
            debug!(thread = %self.thread.name, %label, "sampler abandoned");
            return Some(Flow::StopNow);
        };
        let outcome = match result {
            Ok(mut outcome) => {
                outcome.label = label;
                outcome
            }
            Err(err) => err.into_outcome(label, elapsed_ms),
        };

        self.samples += 1;
        let success = outcome.success;
        self.record(outcome, stack);

        if !success && let Some(flow) = self.on_sample_error(control) {
            return Some(flow);
        }
        if self.past_end_time() {
            return Some(Flow::Stop);
        }
        None
    }

    fn on_sample_error(&self, control: &RunControl) -> Option<Flow> {
        match self.ctx.plan.on_sample_error {
            OnSampleError::Continue => None,
            OnSampleError::StartNextLoop => Some(Flow::RestartThreadLoop),
            OnSampleError::StopThread => Some(Flow::Stop),
            OnSampleError::StopTest => {
                info!(thread = %self.thread.name, "sample failed, stopping test");
                control.request_stop();
                Some(Flow::Stop)
            }
            OnSampleError::StopTestNow => {
                info!(thread = %self.thread.name, "sample failed, stopping test now");
                control.request_stop_now();
                Some(Flow::StopNow)
            }
        }
    }

    async fn run_action(&mut self, action: FlowAction, control: &RunControl) -> Option<Flow> {
        if let Some(flow) = self.interrupted(control) {
            return Some(flow);
        }
        let whole_test = action.target == SignalTarget::WholeTest;

        match action.signal {
            ControlSignal::Pause(pause) => {
                let pause_ms = pause.as_millis().min(u128::from(u64::MAX)) as u64;
                if exceeds_end_time(self.ctx.clock.now_ms(), pause_ms, self.end_time_ms) {
                    return Some(Flow::Stop);
                }
                self.set_state(VuState::Paused);
                let completed = control.sleep_until(deadline_after(Instant::now(), pause)).await;
                self.set_state(VuState::Running);
                (!completed).then(|| stop_flow(control))
            }
            ControlSignal::Stop => {
                if whole_test {
                    control.request_stop();
                }
                Some(Flow::Stop)
            }
            ControlSignal::StopNow => {
                if whole_test {
                    control.request_stop_now();
                }
                Some(Flow::StopNow)
            }
            ControlSignal::RestartNextLoop => Some(Flow::RestartThreadLoop),
            ControlSignal::StartNextIterationCurrentLoop => Some(Flow::NextIteration),
            ControlSignal::BreakCurrentLoop => Some(Flow::BreakLoop),
        }
    }
}

fn stop_flow(control: &RunControl) -> Flow {
    if control.is_stopping_now() {
        Flow::StopNow
    } else {
        Flow::Stop
    }
}

fn transaction_outcome(
    name: &Arc<str>,
    subs: Vec<SampleOutcome>,
    keep_subs: bool,
) -> SampleOutcome {
    let failing = subs.iter().filter(|s| !s.success).count();
    let elapsed_ms = subs
        .iter()
        .fold(0u64, |acc, s| acc.saturating_add(s.elapsed_ms));
    let sent_bytes = subs.iter().fold(0u64, |acc, s| acc.saturating_add(s.sent_bytes));
    let received_bytes = subs
        .iter()
        .fold(0u64, |acc, s| acc.saturating_add(s.received_bytes));
    let response_code = subs
        .iter()
        .rev()
        .find(|s| !s.success)
        .map_or_else(|| "200".to_string(), |s| s.response_code.clone());

    SampleOutcome {
        label: name.clone(),
        success: failing == 0,
        elapsed_ms,
        response_code,
        response_message: format!(
            "Number of samples in transaction : {}, number of failing samples : {failing}",
            subs.len()
        ),
        sub_outcomes: if keep_subs { subs } else { Vec::new() },
        is_transaction_wrapper: true,
        sent_bytes,
        received_bytes,
    }
}
