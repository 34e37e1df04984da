mod active;
mod arrivals;
mod compiler;
mod config_element;
mod control;
mod error;
mod group;
mod listener;
mod plan;
mod progress;
mod run;
mod sampler;
mod schedule;
mod scope;
mod timer;
mod value;
mod vu;

#[cfg(test)]
mod test_support;

pub use active::{ActiveThreadGuard, ActiveThreads};
pub use arrivals::{ArrivalEvent, ArrivalGenerator};
pub use compiler::{CompiledGroup, CompiledPlan, ExecutionPlan, GroupModel, compile};
pub use config_element::{
    ConfigCloneError, ConfigElement, ConfigInstance, CounterConfig, CustomConfig,
};
pub use control::{
    ControlSignal, FAR_FUTURE, OnSampleError, RunClock, RunControl, SignalTarget, StopSignal,
    deadline_after,
};
pub use error::{Error, Result};
pub use group::GroupReport;
pub use listener::{ListenerError, ListenerHook, ThreadListener, notify_listeners};
pub use plan::{
    ClosedModel, ControllerKind, FlowAction, LoopCount, OpenModel, TestElement, TestPlan,
    ThreadGroup, ThreadGroupKind,
};
pub use progress::{LabelProgress, ProgressFn, ProgressUpdate};
pub use run::{RunOptions, RunSummary, TestRun, run_test_plan};
pub use sampler::{Properties, SampleContext, Sampler, SamplerError, ThreadInfo};
pub use schedule::{ArrivalsKind, ScheduleError, Segment, ThreadSchedule};
pub use timer::{
    ConstantThroughputTimer, ConstantTimer, POISSON_NORMAL_THRESHOLD, PoissonRandomTimer,
    ThroughputCursor, ThroughputMode, Timer, TimerEnv, TimerSpec, UniformRandomTimer,
    exceeds_end_time, poisson_sample,
};
pub use value::{Value, Variables};
pub use vu::{VuReport, VuState};

pub use paced_metrics as metrics;
