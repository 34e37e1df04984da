use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::arrivals::ArrivalGenerator;
use crate::compiler::GroupModel;
use crate::control::deadline_after;
use crate::error::{Error, Result};
use crate::plan::{ClosedModel, LoopCount};
use crate::schedule::ThreadSchedule;
use crate::vu::{GroupContext, VirtualUser, VuReport};

/// What a thread group did over the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub name: Arc<str>,
    pub threads_started: u64,
    pub peak_threads: u64,
    pub samples: u64,
    pub iterations: u64,
}

#[derive(Default)]
struct Tally {
    samples: u64,
    iterations: u64,
    first_error: Option<Error>,
}

impl Tally {
    fn absorb(&mut self, res: std::result::Result<Result<VuReport>, JoinError>) {
        match res {
            Ok(Ok(r)) => {
                self.samples = self.samples.saturating_add(r.samples);
                self.iterations = self.iterations.saturating_add(r.iterations);
            }
            Ok(Err(e)) => {
                self.first_error.get_or_insert(e);
            }
            Err(e) => {
                self.first_error.get_or_insert(Error::Join(e));
            }
        }
    }

    async fn drain(&mut self, set: &mut JoinSet<Result<VuReport>>) {
        while let Some(res) = set.join_next().await {
            self.absorb(res);
        }
    }
}

pub(crate) async fn run_group(model: GroupModel, ctx: Arc<GroupContext>) -> Result<GroupReport> {
    let tally = match model {
        GroupModel::Closed(m) => run_closed(&m, &ctx).await?,
        GroupModel::Open {
            schedule,
            random_seed,
        } => run_open(&schedule, random_seed, &ctx).await?,
    };

    let threads = &ctx.env.group_threads;
    info!(
        group = %ctx.plan.group,
        threads = threads.started_total(),
        samples = tally.samples,
        "thread group finished"
    );

    if let Some(err) = tally.first_error {
        return Err(err);
    }
    Ok(GroupReport {
        name: ctx.plan.group.clone(),
        threads_started: threads.started_total(),
        peak_threads: threads.peak(),
        samples: tally.samples,
        iterations: tally.iterations,
    })
}

/// Start offset of thread `i` of `n` when ramping up over `ramp_up`.
pub(crate) fn ramp_offset(ramp_up: Duration, i: u64, n: u64) -> Duration {
    if n == 0 {
        return Duration::ZERO;
    }
    let nanos = ramp_up.as_nanos() * u128::from(i) / u128::from(n);
    Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
}

/// Fixed population; each user loops until its loop count or end time.
async fn run_closed(m: &ClosedModel, ctx: &Arc<GroupContext>) -> Result<Tally> {
    let control = ctx.control.clone();
    let group_start = deadline_after(Instant::now(), m.start_delay);
    let mut tally = Tally::default();

    if !m.start_delay.is_zero() && !control.sleep_until(group_start).await {
        return Ok(tally);
    }

    info!(
        group = %ctx.plan.group,
        threads = m.threads,
        ramp_up = ?m.ramp_up,
        loops = ?m.loops,
        duration = ?m.duration,
        "closed thread group started"
    );

    let end_time_ms = m.duration.map(|d| ctx.clock.ms_at(deadline_after(group_start, d)));
    let users = (0..m.threads)
        .map(|i| VirtualUser::new(ctx.clone(), i, m.loops, end_time_ms))
        .collect::<Result<Vec<_>>>()?;

    let mut set = JoinSet::new();
    for (i, user) in (0..m.threads).zip(users) {
        let offset = ramp_offset(m.ramp_up, i, m.threads);
        let control = control.clone();
        set.spawn(async move {
            if !offset.is_zero() && !control.sleep_until(deadline_after(group_start, offset)).await {
                return Ok(VuReport::default());
            }
            user.run().await
        });
    }

    tally.drain(&mut set).await;
    Ok(tally)
}

/// Users spawned on the schedule's arrival instants, each running the plan once.
async fn run_open(
    schedule: &ThreadSchedule,
    random_seed: u64,
    ctx: &Arc<GroupContext>,
) -> Result<Tally> {
    let control = ctx.control.clone();
    let seed = match random_seed {
        0 => ctx.seed,
        s => Some(s),
    };
    let rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let total = schedule.total_duration();
    let start = Instant::now();
    let end_time_ms = Some(ctx.clock.ms_at(deadline_after(start, total)));

    info!(
        group = %ctx.plan.group,
        %schedule,
        total = ?total,
        "open thread group started"
    );

    let mut tally = Tally::default();
    let mut set = JoinSet::new();
    for arrival in ArrivalGenerator::new(schedule, rng) {
        if !control.sleep_until(deadline_after(start, arrival.offset)).await {
            info!(group = %ctx.plan.group, "arrivals halted by stop request");
            break;
        }
        while let Some(res) = set.try_join_next() {
            tally.absorb(res);
        }

        let user = match VirtualUser::new(
            ctx.clone(),
            arrival.virtual_user_id,
            LoopCount::Finite(1),
            end_time_ms,
        ) {
            Ok(user) => user,
            Err(e) => {
                warn!(group = %ctx.plan.group, error = %e, "cannot start user, halting arrivals");
                tally.first_error.get_or_insert(e);
                break;
            }
        };
        set.spawn(user.run());
    }

    if tally.first_error.is_none() && control.sleep_until(deadline_after(start, total)).await {
        info!(group = %ctx.plan.group, "schedule exhausted");
    }
    tally.drain(&mut set).await;
    Ok(tally)
}
