use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::compiler::{ConfigId, ExecutionPlan, TimerId};
use crate::config_element::ConfigInstance;
use crate::error::Result;
use crate::sampler::Properties;
use crate::timer::{Timer, TimerEnv};
use crate::value::{Value, Variables};

/// One user's private copies of every config element and timer in its plan.
///
/// Exactly one instance exists per element for the lifetime of the user, so
/// every step that references an element sees the same state.
#[derive(Debug)]
pub(crate) struct ThreadScope {
    configs: Vec<Box<dyn ConfigInstance>>,
    timers: Vec<Box<dyn Timer>>,
}

impl ThreadScope {
    pub(crate) fn materialize(
        plan: &ExecutionPlan,
        env: &TimerEnv,
        seed: Option<u64>,
        thread_num: u64,
    ) -> Result<Self> {
        let configs = plan
            .configs
            .iter()
            .map(|c| c.clone_for_thread())
            .collect::<Result<Vec<_>>>()?;

        let timers = plan
            .timers
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let env = env.clone().with_cursor(slot.cursor.clone());
                slot.spec
                    .build(&env, timer_rng(seed, &plan.group, thread_num, i as u64))
            })
            .collect();

        Ok(Self { configs, timers })
    }

    pub(crate) fn config_count(&self) -> usize {
        self.configs.len()
    }

    /// Runs `apply_to` for `ids` in order.
    pub(crate) fn apply(&mut self, ids: &[ConfigId], vars: &mut Variables) {
        for id in ids {
            if let Some(config) = self.configs.get_mut(*id) {
                config.apply_to(vars);
            }
        }
    }

    /// First value of `name` among `ids` (nearest first).
    pub(crate) fn property(&self, ids: &[ConfigId], name: &str) -> Option<Value> {
        ids.iter()
            .filter_map(|id| self.configs.get(*id))
            .find_map(|c| c.property(name))
    }

    /// Merged properties of `ids`, nearest definition winning, with `${var}`
    /// references resolved against `vars`.
    pub(crate) fn properties(&self, ids: &[ConfigId], vars: &Variables) -> Properties {
        let mut out = Properties::default();
        for config in ids.iter().filter_map(|id| self.configs.get(*id)) {
            config.for_each_property(&mut |name, value| {
                if out.contains_key(name) {
                    return;
                }
                let value = match value {
                    Value::String(s) => Value::String(vars.substitute_arc(s)),
                    other => other.clone(),
                };
                out.insert(name.clone(), value);
            });
        }
        out
    }

    pub(crate) fn group_iteration_started(&mut self) {
        for timer in &mut self.timers {
            timer.iteration_start();
        }
        for config in &mut self.configs {
            config.group_iteration_started();
        }
    }

    /// Sum of the delays of `ids`, in milliseconds.
    pub(crate) fn total_delay(&mut self, ids: &[TimerId], now_ms: u64) -> u64 {
        let mut total = 0u64;
        for id in ids {
            if let Some(timer) = self.timers.get_mut(*id) {
                total = total.saturating_add(timer.delay(now_ms));
            }
        }
        total
    }
}

fn timer_rng(seed: Option<u64>, group: &str, thread_num: u64, timer: u64) -> StdRng {
    let Some(seed) = seed else {
        return StdRng::from_entropy();
    };
    let group_hash = group
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
    let mixed = seed
        ^ group_hash
        ^ thread_num.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ timer.wrapping_mul(0xd1b5_4a32_d192_ed03);
    StdRng::seed_from_u64(mixed)
}
