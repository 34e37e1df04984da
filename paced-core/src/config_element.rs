use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::value::{Value, Variables};

/// Counter settings. `end` wraps the counter back to `start` once passed.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterConfig {
    pub variable: Arc<str>,
    pub start: i64,
    pub increment: i64,
    pub end: Option<i64>,
    /// One sequence per user instead of one shared by the whole group.
    pub per_user: bool,
    /// Restart a per-user sequence at every thread-group iteration.
    pub reset_on_group_iteration: bool,
}

impl CounterConfig {
    pub fn new(variable: impl Into<Arc<str>>) -> Self {
        Self {
            variable: variable.into(),
            start: 0,
            increment: 1,
            end: None,
            per_user: false,
            reset_on_group_iteration: false,
        }
    }

    fn advance(&self, current: i64) -> i64 {
        let next = current.saturating_add(self.increment);
        match self.end {
            Some(end) if self.increment > 0 && next > end => self.start,
            Some(end) if self.increment < 0 && next < end => self.start,
            _ => next,
        }
    }
}

/// Typed configuration element placed in a test tree.
#[derive(Debug, Clone)]
pub enum ConfigElement {
    Counter(CounterConfig),
    /// Variables assigned whenever the owning scope is entered.
    UserVariables(Vec<(Arc<str>, Value)>),
    /// Properties handed to samplers in scope.
    SamplerDefaults(Vec<(Arc<str>, Value)>),
    Custom(Arc<dyn CustomConfig>),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ConfigCloneError(pub String);

/// Extension point for config elements not built into the engine.
pub trait CustomConfig: Send + Sync + fmt::Debug {
    /// Produces the copy a single virtual user will own.
    fn try_clone(&self) -> std::result::Result<Box<dyn ConfigInstance>, ConfigCloneError>;
}

/// The per-thread copy of a config element.
pub trait ConfigInstance: Send + fmt::Debug {
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    fn for_each_property(&self, _f: &mut dyn FnMut(&Arc<str>, &Value)) {}

    /// Called each time the owning scope starts a pass.
    fn apply_to(&mut self, _vars: &mut Variables) {}

    fn group_iteration_started(&mut self) {}
}

/// A config element after compilation, ready to be cloned per thread.
#[derive(Debug)]
pub(crate) struct PreparedConfig {
    pub(crate) name: Arc<str>,
    element: ConfigElement,
    shared_counter: Option<Arc<Mutex<i64>>>,
}

impl PreparedConfig {
    pub(crate) fn prepare(name: Arc<str>, element: ConfigElement) -> Result<Self> {
        let shared_counter = match &element {
            ConfigElement::Counter(c) => {
                if c.increment == 0 {
                    return Err(Error::InvalidCounter(name.to_string()));
                }
                (!c.per_user).then(|| Arc::new(Mutex::new(c.start)))
            }
            _ => None,
        };

        let prepared = Self {
            name,
            element,
            shared_counter,
        };
        // Refusals must surface before any user starts.
        prepared.clone_for_thread()?;
        Ok(prepared)
    }

    pub(crate) fn clone_for_thread(&self) -> Result<Box<dyn ConfigInstance>> {
        let instance: Box<dyn ConfigInstance> = match &self.element {
            ConfigElement::Counter(cfg) => {
                let state = match &self.shared_counter {
                    Some(cell) => CounterState::Shared(cell.clone()),
                    None => CounterState::PerUser(cfg.start),
                };
                Box::new(CounterInstance {
                    cfg: cfg.clone(),
                    state,
                })
            }
            ConfigElement::UserVariables(vars) => Box::new(UserVariablesInstance {
                vars: Arc::from(vars.as_slice()),
            }),
            ConfigElement::SamplerDefaults(props) => Box::new(DefaultsInstance {
                props: Arc::from(props.as_slice()),
            }),
            ConfigElement::Custom(custom) => {
                custom
                    .try_clone()
                    .map_err(|e| Error::ConfigNotCloneable {
                        name: self.name.to_string(),
                        reason: e.0,
                    })?
            }
        };
        Ok(instance)
    }
}

#[derive(Debug)]
enum CounterState {
    PerUser(i64),
    Shared(Arc<Mutex<i64>>),
}

#[derive(Debug)]
struct CounterInstance {
    cfg: CounterConfig,
    state: CounterState,
}

impl CounterInstance {
    fn next_value(&mut self) -> i64 {
        match &mut self.state {
            CounterState::PerUser(current) => {
                let v = *current;
                *current = self.cfg.advance(v);
                v
            }
            CounterState::Shared(cell) => {
                let mut current = cell.lock();
                let v = *current;
                *current = self.cfg.advance(v);
                v
            }
        }
    }
}

impl ConfigInstance for CounterInstance {
    fn property(&self, name: &str) -> Option<Value> {
        match name {
            "start" => Some(Value::I64(self.cfg.start)),
            "increment" => Some(Value::I64(self.cfg.increment)),
            "end" => self.cfg.end.map(Value::I64),
            _ => None,
        }
    }

    fn apply_to(&mut self, vars: &mut Variables) {
        let v = self.next_value();
        vars.set(self.cfg.variable.clone(), Value::I64(v));
    }

    fn group_iteration_started(&mut self) {
        if self.cfg.reset_on_group_iteration
            && let CounterState::PerUser(current) = &mut self.state
        {
            *current = self.cfg.start;
        }
    }
}

#[derive(Debug)]
struct UserVariablesInstance {
    vars: Arc<[(Arc<str>, Value)]>,
}

impl ConfigInstance for UserVariablesInstance {
    fn property(&self, name: &str) -> Option<Value> {
        lookup(&self.vars, name)
    }

    fn apply_to(&mut self, vars: &mut Variables) {
        for (name, value) in self.vars.iter() {
            let value = match value {
                Value::String(s) => Value::from(vars.substitute(s)),
                other => other.clone(),
            };
            vars.set(name.clone(), value);
        }
    }
}

#[derive(Debug)]
struct DefaultsInstance {
    props: Arc<[(Arc<str>, Value)]>,
}

impl ConfigInstance for DefaultsInstance {
    fn property(&self, name: &str) -> Option<Value> {
        lookup(&self.props, name)
    }

    fn for_each_property(&self, f: &mut dyn FnMut(&Arc<str>, &Value)) {
        for (k, v) in self.props.iter() {
            f(k, v);
        }
    }
}

fn lookup(pairs: &[(Arc<str>, Value)], name: &str) -> Option<Value> {
    pairs
        .iter()
        .find(|(k, _)| &**k == name)
        .map(|(_, v)| v.clone())
}
