use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use paced_core::{
    ClosedModel, ConfigElement, ControlSignal, ControllerKind, CounterConfig, LoopCount,
    OnSampleError, OpenModel, SignalTarget, TestElement, TestPlan, ThreadGroup, ThroughputMode,
    TimerSpec, Value,
};
use serde::Deserialize;

use crate::listeners::LogListener;
use crate::samplers::{DebugSampler, DummySampler};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlanYaml {
    #[serde(default)]
    name: Option<String>,

    /// Elements applied to every thread group.
    #[serde(default)]
    elements: Vec<ElementYaml>,

    groups: Vec<GroupYaml>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum GroupYaml {
    Closed(ClosedGroupYaml),
    Open(OpenGroupYaml),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ClosedGroupYaml {
    name: String,
    #[serde(default = "one")]
    threads: u64,
    #[serde(default)]
    ramp_up: YamlDuration,
    #[serde(default)]
    loops: Option<LoopsYaml>,
    #[serde(default)]
    duration: Option<YamlDuration>,
    #[serde(default)]
    start_delay: YamlDuration,
    #[serde(default)]
    on_sample_error: Option<String>,
    #[serde(default)]
    elements: Vec<ElementYaml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OpenGroupYaml {
    name: String,
    schedule: String,
    #[serde(default)]
    random_seed: u64,
    #[serde(default)]
    on_sample_error: Option<String>,
    #[serde(default)]
    elements: Vec<ElementYaml>,
}

fn one() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LoopsYaml {
    Count(u64),
    Word(String),
}

impl LoopsYaml {
    fn into_loop_count(self) -> anyhow::Result<LoopCount> {
        match self {
            Self::Count(n) => Ok(LoopCount::Finite(n)),
            Self::Word(w) if w.eq_ignore_ascii_case("infinite") => Ok(LoopCount::Infinite),
            Self::Word(w) => anyhow::bail!("invalid loop count `{w}` (expected a number or `infinite`)"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ElementYaml {
    Dummy(DummyYaml),
    Debug(DebugYaml),
    Simple(SimpleYaml),
    Loop(LoopYaml),
    Transaction(TransactionYaml),
    ConstantTimer(ConstantTimerYaml),
    UniformRandomTimer(RandomTimerYaml),
    PoissonRandomTimer(PoissonTimerYaml),
    ConstantThroughputTimer(ThroughputTimerYaml),
    Counter(CounterYaml),
    UserVariables(UserVariablesYaml),
    SamplerDefaults(SamplerDefaultsYaml),
    Action(ActionYaml),
    LogListener(LogListenerYaml),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DummyYaml {
    label: String,
    #[serde(default)]
    latency: YamlDuration,
    #[serde(default = "yes")]
    success: bool,
    #[serde(default)]
    response_code: Option<String>,
    #[serde(default)]
    response_message: Option<String>,
    #[serde(default)]
    sent_bytes: u64,
    #[serde(default)]
    received_bytes: u64,
    #[serde(default)]
    children: Vec<ElementYaml>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DebugYaml {
    label: String,
    #[serde(default)]
    children: Vec<ElementYaml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SimpleYaml {
    name: String,
    #[serde(default)]
    children: Vec<ElementYaml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LoopYaml {
    name: String,
    count: LoopsYaml,
    #[serde(default)]
    children: Vec<ElementYaml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TransactionYaml {
    name: String,
    #[serde(default)]
    generate_parent_sample: bool,
    #[serde(default)]
    children: Vec<ElementYaml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConstantTimerYaml {
    delay: YamlDuration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RandomTimerYaml {
    #[serde(default)]
    delay: YamlDuration,
    range: YamlDuration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PoissonTimerYaml {
    #[serde(default)]
    delay: YamlDuration,
    lambda: YamlDuration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ThroughputTimerYaml {
    /// Samples per minute.
    throughput: f64,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CounterYaml {
    #[serde(default)]
    name: Option<String>,
    variable: String,
    #[serde(default)]
    start: i64,
    #[serde(default = "one_i64")]
    increment: i64,
    #[serde(default)]
    end: Option<i64>,
    #[serde(default)]
    per_user: bool,
    #[serde(default)]
    reset_on_group_iteration: bool,
}

fn one_i64() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UserVariablesYaml {
    #[serde(default)]
    name: Option<String>,
    variables: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SamplerDefaultsYaml {
    #[serde(default)]
    name: Option<String>,
    properties: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ActionYaml {
    signal: String,
    #[serde(default)]
    target: Option<String>,
    /// Pause length for `signal: pause`.
    #[serde(default)]
    duration: Option<YamlDuration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogListenerYaml {}

/// Duration as a humantime string (`250ms`, `1m 30s`) or a number of seconds.
#[derive(Debug, Clone, Copy, Default)]
struct YamlDuration(Duration);

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v.unsigned_abs())))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0.0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|_| E::custom(format!("duration of {v} seconds is out of range")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub async fn load_plan(path: &Path) -> anyhow::Result<TestPlan> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read test plan: {}", path.display()))?;
    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("plan")
        .to_string();
    parse_plan(&bytes, &default_name)
        .with_context(|| format!("invalid test plan: {}", path.display()))
}

pub fn parse_plan(bytes: &[u8], default_name: &str) -> anyhow::Result<TestPlan> {
    let doc: PlanYaml = serde_yaml::from_slice(bytes).context("failed to parse YAML")?;

    let elements = convert_all(doc.elements)?;
    let groups = doc
        .groups
        .into_iter()
        .map(GroupYaml::into_group)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(TestPlan {
        name: doc.name.unwrap_or_else(|| default_name.to_string()),
        elements,
        groups,
    })
}

impl GroupYaml {
    fn into_group(self) -> anyhow::Result<ThreadGroup> {
        match self {
            Self::Closed(g) => {
                let loops = match g.loops {
                    Some(l) => l.into_loop_count(),
                    // a bare duration means "loop until the end time"
                    None if g.duration.is_some() => Ok(LoopCount::Infinite),
                    None => Ok(LoopCount::Finite(1)),
                }
                .with_context(|| format!("thread group `{}`", g.name))?;

                let model = ClosedModel {
                    threads: g.threads,
                    ramp_up: g.ramp_up.0,
                    loops,
                    duration: g.duration.map(|d| d.0),
                    start_delay: g.start_delay.0,
                };
                let elements = convert_all(g.elements)?;
                let group = ThreadGroup::closed(g.name.as_str(), model, elements);
                with_policy(group, g.on_sample_error)
            }
            Self::Open(g) => {
                let model = OpenModel {
                    schedule: g.schedule,
                    random_seed: g.random_seed,
                };
                let elements = convert_all(g.elements)?;
                let group = ThreadGroup::open(g.name.as_str(), model, elements);
                with_policy(group, g.on_sample_error)
            }
        }
    }
}

fn with_policy(group: ThreadGroup, policy: Option<String>) -> anyhow::Result<ThreadGroup> {
    let Some(policy) = policy else {
        return Ok(group);
    };
    let parsed: OnSampleError = policy.parse().map_err(|_| {
        anyhow::anyhow!(
            "thread group `{}`: unknown onSampleError `{policy}` (expected continue, start_next_loop, stop_thread, stop_test or stop_test_now)",
            group.name
        )
    })?;
    Ok(group.with_on_sample_error(parsed))
}

fn convert_all(elements: Vec<ElementYaml>) -> anyhow::Result<Vec<TestElement>> {
    elements.into_iter().map(ElementYaml::into_element).collect()
}

impl ElementYaml {
    fn into_element(self) -> anyhow::Result<TestElement> {
        let el = match self {
            Self::Dummy(d) => {
                let defaults = DummySampler::default();
                let sampler = DummySampler {
                    latency: d.latency.0,
                    success: d.success,
                    response_code: d.response_code.unwrap_or(defaults.response_code),
                    response_message: d.response_message.unwrap_or(defaults.response_message),
                    sent_bytes: d.sent_bytes,
                    received_bytes: d.received_bytes,
                };
                TestElement::Sampler {
                    label: Arc::from(d.label),
                    sampler: Arc::new(sampler),
                    children: convert_all(d.children)?,
                }
            }
            Self::Debug(d) => TestElement::Sampler {
                label: Arc::from(d.label),
                sampler: Arc::new(DebugSampler),
                children: convert_all(d.children)?,
            },
            Self::Simple(c) => {
                TestElement::controller(c.name, ControllerKind::Simple, convert_all(c.children)?)
            }
            Self::Loop(c) => {
                let count = c
                    .count
                    .into_loop_count()
                    .with_context(|| format!("loop `{}`", c.name))?;
                TestElement::controller(
                    c.name,
                    ControllerKind::Loop { count },
                    convert_all(c.children)?,
                )
            }
            Self::Transaction(c) => TestElement::controller(
                c.name,
                ControllerKind::Transaction {
                    generate_parent_sample: c.generate_parent_sample,
                },
                convert_all(c.children)?,
            ),
            Self::ConstantTimer(t) => TestElement::Timer(TimerSpec::Constant { delay: t.delay.0 }),
            Self::UniformRandomTimer(t) => TestElement::Timer(TimerSpec::UniformRandom {
                delay: t.delay.0,
                range: t.range.0,
            }),
            Self::PoissonRandomTimer(t) => TestElement::Timer(TimerSpec::PoissonRandom {
                delay: t.delay.0,
                lambda: t.lambda.0,
            }),
            Self::ConstantThroughputTimer(t) => {
                let mode = match t.mode {
                    None => ThroughputMode::default(),
                    Some(m) => m
                        .parse()
                        .map_err(|_| anyhow::anyhow!("unknown throughput timer mode `{m}`"))?,
                };
                TestElement::Timer(TimerSpec::ConstantThroughput {
                    per_minute: t.throughput,
                    mode,
                })
            }
            Self::Counter(c) => {
                let name = c.name.unwrap_or_else(|| c.variable.clone());
                let mut cfg = CounterConfig::new(c.variable);
                cfg.start = c.start;
                cfg.increment = c.increment;
                cfg.end = c.end;
                cfg.per_user = c.per_user;
                cfg.reset_on_group_iteration = c.reset_on_group_iteration;
                TestElement::config(name, ConfigElement::Counter(cfg))
            }
            Self::UserVariables(u) => TestElement::config(
                u.name.unwrap_or_else(|| "user variables".to_string()),
                ConfigElement::UserVariables(convert_values(u.variables)?),
            ),
            Self::SamplerDefaults(s) => TestElement::config(
                s.name.unwrap_or_else(|| "sampler defaults".to_string()),
                ConfigElement::SamplerDefaults(convert_values(s.properties)?),
            ),
            Self::Action(a) => {
                let signal = parse_signal(&a.signal, a.duration)?;
                let target = match a.target {
                    None => SignalTarget::default(),
                    Some(t) => t.parse().map_err(|_| {
                        anyhow::anyhow!("unknown action target `{t}` (expected this_thread or whole_test)")
                    })?,
                };
                TestElement::action(signal, target)
            }
            Self::LogListener(_) => TestElement::Listener(Arc::new(LogListener)),
        };
        Ok(el)
    }
}

fn parse_signal(name: &str, duration: Option<YamlDuration>) -> anyhow::Result<ControlSignal> {
    let signal = match name.to_ascii_lowercase().as_str() {
        "pause" => {
            let d = duration.context("action `pause` requires a `duration`")?;
            return Ok(ControlSignal::Pause(d.0));
        }
        "stop" => ControlSignal::Stop,
        "stop_now" => ControlSignal::StopNow,
        "restart_next_loop" => ControlSignal::RestartNextLoop,
        "start_next_iteration_current_loop" => ControlSignal::StartNextIterationCurrentLoop,
        "break_current_loop" => ControlSignal::BreakCurrentLoop,
        other => anyhow::bail!("unknown action signal `{other}`"),
    };
    if duration.is_some() {
        anyhow::bail!("action `{name}` does not take a `duration`");
    }
    Ok(signal)
}

fn convert_values(raw: BTreeMap<String, serde_yaml::Value>) -> anyhow::Result<Vec<(Arc<str>, Value)>> {
    raw.into_iter()
        .map(|(k, v)| {
            let value = match v {
                serde_yaml::Value::Null => Value::Null,
                serde_yaml::Value::Bool(b) => Value::Bool(b),
                serde_yaml::Value::Number(n) => match n.as_i64() {
                    Some(i) => Value::I64(i),
                    None => Value::F64(n.as_f64().unwrap_or(f64::NAN)),
                },
                serde_yaml::Value::String(s) => Value::from(s),
                _ => anyhow::bail!("value of `{k}` must be a scalar"),
            };
            Ok((Arc::from(k), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> TestPlan {
        parse_plan(src.as_bytes(), "fallback").unwrap_or_else(|e| panic!("{e:#}"))
    }

    fn parse_err(src: &str) -> String {
        match parse_plan(src.as_bytes(), "fallback") {
            Ok(_) => panic!("expected an error"),
            Err(e) => format!("{e:#}"),
        }
    }

    #[test]
    fn parses_closed_and_open_groups() {
        let plan = parse(
            r#"
name: shop
elements:
  - kind: sampler_defaults
    properties: { host: shop.test, port: 8080 }
groups:
  - kind: closed
    name: browse
    threads: 4
    rampUp: 2s
    duration: 1m
    onSampleError: start_next_loop
    elements:
      - kind: uniform_random_timer
        delay: 100ms
        range: 50ms
      - kind: dummy
        label: home
        latency: 20ms
  - kind: open
    name: checkout
    schedule: rate(5/sec) random_arrivals(10s)
    randomSeed: 9
    elements:
      - kind: debug
        label: echo
"#,
        );

        assert_eq!(plan.name, "shop");
        assert_eq!(plan.elements.len(), 1);
        assert_eq!(plan.groups.len(), 2);

        let browse = &plan.groups[0];
        assert_eq!(browse.on_sample_error, OnSampleError::StartNextLoop);
        match &browse.kind {
            paced_core::ThreadGroupKind::Closed(m) => {
                assert_eq!(m.threads, 4);
                assert_eq!(m.ramp_up, Duration::from_secs(2));
                assert_eq!(m.duration, Some(Duration::from_secs(60)));
                assert_eq!(m.loops, LoopCount::Infinite);
            }
            other => panic!("expected closed group, got {other:?}"),
        }

        match &plan.groups[1].kind {
            paced_core::ThreadGroupKind::Open(m) => {
                assert_eq!(m.schedule, "rate(5/sec) random_arrivals(10s)");
                assert_eq!(m.random_seed, 9);
            }
            other => panic!("expected open group, got {other:?}"),
        }
    }

    #[test]
    fn plan_name_defaults_to_file_stem() {
        let plan = parse("groups: [{kind: closed, name: g}]");
        assert_eq!(plan.name, "fallback");
        match &plan.groups[0].kind {
            paced_core::ThreadGroupKind::Closed(m) => assert_eq!(m, &ClosedModel::default()),
            other => panic!("expected closed group, got {other:?}"),
        }
    }

    #[test]
    fn nested_controllers_and_actions() {
        let plan = parse(
            r#"
groups:
  - kind: closed
    name: g
    loops: infinite
    duration: 10s
    elements:
      - kind: counter
        variable: n
        perUser: true
        end: 3
      - kind: loop
        name: inner
        count: 3
        children:
          - kind: transaction
            name: tx
            generateParentSample: true
            children:
              - kind: dummy
                label: a
                children:
                  - kind: constant_timer
                    delay: 0.5
          - kind: action
            signal: pause
            duration: 250ms
      - kind: action
        signal: stop
        target: whole_test
      - kind: log_listener
"#,
        );

        let elements = &plan.groups[0].elements;
        assert_eq!(elements.len(), 4);
        match &elements[1] {
            TestElement::Controller { kind, children, .. } => {
                assert_eq!(*kind, ControllerKind::Loop { count: LoopCount::Finite(3) });
                assert!(matches!(
                    children[1],
                    TestElement::Action(paced_core::FlowAction {
                        signal: ControlSignal::Pause(d),
                        target: SignalTarget::ThisThread,
                    }) if d == Duration::from_millis(250)
                ));
            }
            other => panic!("expected loop controller, got {other:?}"),
        }
        assert!(matches!(
            elements[2],
            TestElement::Action(paced_core::FlowAction {
                signal: ControlSignal::Stop,
                target: SignalTarget::WholeTest,
            })
        ));
        assert!(matches!(elements[3], TestElement::Listener(_)));
    }

    #[test]
    fn values_keep_their_types() {
        let vals = convert_values(BTreeMap::from([
            ("i".to_string(), serde_yaml::Value::from(3)),
            ("f".to_string(), serde_yaml::Value::from(1.5)),
            ("s".to_string(), serde_yaml::Value::from("x")),
            ("b".to_string(), serde_yaml::Value::from(true)),
        ]))
        .unwrap_or_else(|e| panic!("{e}"));
        let get = |k: &str| vals.iter().find(|(n, _)| &**n == k).map(|(_, v)| v.clone());
        assert_eq!(get("i"), Some(Value::I64(3)));
        assert_eq!(get("f"), Some(Value::F64(1.5)));
        assert_eq!(get("s"), Some(Value::from("x")));
        assert_eq!(get("b"), Some(Value::Bool(true)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_err("groups: [{kind: closed, name: g, loops: often}]").contains("often"));
        assert!(parse_err("groups: [{kind: sideways, name: g}]").contains("sideways"));
        assert!(
            parse_err("groups: [{kind: closed, name: g, onSampleError: retry}]").contains("retry")
        );
        assert!(
            parse_err(
                "groups: [{kind: closed, name: g, elements: [{kind: action, signal: pause}]}]"
            )
            .contains("duration")
        );
        assert!(
            parse_err("groups: [{kind: closed, name: g, thread: 3}]").contains("thread")
        );
        assert!(
            parse_err(
                "groups: [{kind: closed, name: g, elements: [{kind: constant_throughput_timer, throughput: 60, mode: sometimes}]}]"
            )
            .contains("sometimes")
        );
        assert!(
            parse_err("groups: [{kind: closed, name: g, startDelay: 1.0e30}]")
                .contains("out of range")
        );
        assert!(
            parse_err("groups: [{kind: closed, name: g, rampUp: -2}]").contains("negative")
        );
    }
}
