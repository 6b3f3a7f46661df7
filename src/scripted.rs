//! In-process simulated engine.
//!
//! [`ScriptedEngine`] keeps a monotonic ground state (loaded facts and rules,
//! grounded parts, external assignments) and delegates the search itself to
//! a [`Behaviour`], which plans the models one search will report. The
//! search runs on its own thread, honours cancellation at safe points every
//! few milliseconds, and finishes with a statistics tree.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::{
    Engine, EngineError, Interrupter, ModelEvent, Part, ProgramSource, Result, Satisfiability,
    SolveCallbacks, SolveHandle, SolveOutcome, ValueLookup,
};
use crate::facts::{parse_program, Argument, Fact, Statement, Statistics};

/// Interval between cancellation checks.
const SAFE_POINT: Duration = Duration::from_millis(5);

/// Everything an engine has been told so far.
#[derive(Clone, Debug, Default)]
pub struct GroundState {
    facts: BTreeSet<Fact>,
    constants: BTreeMap<String, Argument>,
    rules: Vec<String>,
    parts: Vec<Part>,
    externals: BTreeMap<Fact, bool>,
    values: bool,
    solve_calls: u64,
    arguments: Vec<String>,
}

impl GroundState {
    pub fn facts(&self) -> &BTreeSet<Fact> {
        &self.facts
    }

    pub fn predicate<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Fact> + 'a {
        self.facts.iter().filter(move |fact| fact.name() == name)
    }

    pub fn constant(&self, name: &str) -> Option<&Argument> {
        self.constants.get(name)
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Grounded parts in grounding order, without repetitions.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn is_grounded(&self, name: &str) -> bool {
        self.parts.iter().any(|part| part.name == name)
    }

    /// The most recently grounded part with this name.
    pub fn latest(&self, name: &str) -> Option<&Part> {
        self.parts.iter().rev().find(|part| part.name == name)
    }

    pub fn externals(&self) -> &BTreeMap<Fact, bool> {
        &self.externals
    }

    /// External facts currently assigned true.
    pub fn true_externals(&self) -> BTreeSet<Fact> {
        self.externals
            .iter()
            .filter(|(_, value)| **value)
            .map(|(fact, _)| fact.clone())
            .collect()
    }

    pub fn values_registered(&self) -> bool {
        self.values
    }

    pub fn solve_calls(&self) -> u64 {
        self.solve_calls
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

/// One model a search will report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlannedModel {
    /// Search time spent before the model is reported.
    pub delay: Duration,
    pub facts: Vec<Fact>,
    pub cost: Vec<i64>,
    /// Continuous variable values, keyed by variable.
    pub values: BTreeMap<Fact, f64>,
}

impl PlannedModel {
    pub fn new(facts: Vec<Fact>) -> Self {
        Self {
            facts,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_cost(mut self, cost: Vec<i64>) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_value(mut self, variable: &str, value: f64) -> Self {
        self.values.insert(Fact::constant(variable), value);
        self
    }
}

/// What happens after the last planned model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tail {
    /// The search space is exhausted after this much more search.
    Exhaust(Duration),
    /// The search never finishes on its own.
    Endless,
}

/// The models of one search and how it ends.
#[derive(Clone, Debug, PartialEq)]
pub struct SolvePlan {
    pub models: Vec<PlannedModel>,
    pub tail: Tail,
}

impl SolvePlan {
    pub fn new(models: Vec<PlannedModel>, tail: Tail) -> Self {
        Self { models, tail }
    }

    /// A search that proves there is no model.
    pub fn unsatisfiable() -> Self {
        Self::new(Vec::new(), Tail::Exhaust(Duration::ZERO))
    }
}

/// Decides what one search reports, given the current ground state.
pub trait Behaviour: Send + 'static {
    fn plan(&mut self, state: &GroundState) -> SolvePlan;
}

impl<F> Behaviour for F
where
    F: FnMut(&GroundState) -> SolvePlan + Send + 'static,
{
    fn plan(&mut self, state: &GroundState) -> SolvePlan {
        self(state)
    }
}

/// Simulated engine driven by a [`Behaviour`].
///
/// # Examples
///
/// ```
/// use fleet_scheduling::engine::{Engine, Part, ProgramSource};
/// use fleet_scheduling::scripted::{GroundState, ScriptedEngine, SolvePlan};
///
/// let mut engine = ScriptedEngine::new(|_: &GroundState| SolvePlan::unsatisfiable());
/// engine.load(ProgramSource::Text("node(1). node(2).".to_string())).unwrap();
/// engine.ground(&[Part::base()]).unwrap();
/// engine.ground(&[Part::base()]).unwrap();
///
/// assert_eq!(engine.state().facts().len(), 2);
/// assert_eq!(engine.state().parts().len(), 1);
/// ```
pub struct ScriptedEngine<B> {
    state: GroundState,
    behaviour: B,
    interrupts: Arc<AtomicUsize>,
    late_interrupts: Arc<AtomicUsize>,
}

impl<B: Behaviour> ScriptedEngine<B> {
    pub fn new(behaviour: B) -> Self {
        Self {
            state: GroundState::default(),
            behaviour,
            interrupts: Arc::new(AtomicUsize::new(0)),
            late_interrupts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine options, reported under `configuration` in the statistics.
    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.state.arguments = arguments;
        self
    }

    pub fn state(&self) -> &GroundState {
        &self.state
    }

    /// Interrupt requests received over all searches.
    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Interrupt requests received after the search handle was released.
    pub fn late_interrupts(&self) -> usize {
        self.late_interrupts.load(Ordering::SeqCst)
    }

    fn absorb(&mut self, text: &str) -> Result<()> {
        for statement in parse_program(text)? {
            match statement {
                Statement::Fact(fact) => {
                    self.state.facts.insert(fact);
                }
                Statement::Constant { name, value } => {
                    self.state.constants.insert(name, value);
                }
                Statement::Other(rule) => self.state.rules.push(rule),
            }
        }
        Ok(())
    }
}

impl<B: Behaviour> Engine for ScriptedEngine<B> {
    fn load(&mut self, source: ProgramSource) -> Result<()> {
        match source {
            ProgramSource::Text(text) => self.absorb(&text),
            ProgramSource::File(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| EngineError::Io {
                    path: path.clone(),
                    source,
                })?;
                self.absorb(&text)
            }
        }
    }

    fn add_facts(&mut self, facts: &[Fact]) -> Result<()> {
        self.state.facts.extend(facts.iter().cloned());
        Ok(())
    }

    fn ground(&mut self, parts: &[Part]) -> Result<()> {
        for part in parts {
            if !self.state.parts.contains(part) {
                debug!(part = %part, "Grounding part");
                self.state.parts.push(part.clone());
            }
        }
        Ok(())
    }

    fn assign_external(&mut self, fact: &Fact, value: bool) -> Result<()> {
        self.state.externals.insert(fact.clone(), value);
        Ok(())
    }

    fn register_values(&mut self) -> Result<()> {
        self.state.values = true;
        Ok(())
    }

    fn solve_async(&mut self, callbacks: SolveCallbacks) -> Result<Box<dyn SolveHandle + '_>> {
        self.state.solve_calls += 1;
        let plan = self.behaviour.plan(&self.state);
        let summary = json!({
            "calls": self.state.solve_calls,
            "configuration": self.state.arguments,
            "problem": {
                "facts": self.state.facts.len(),
                "parts": self.state.parts.len(),
                "rules": self.state.rules.len(),
                "externals": self.state.externals.len(),
            },
        });

        let token = CancellationToken::new();
        let search_token = token.clone();
        let values = self.state.values;
        let thread = std::thread::spawn(move || search(plan, callbacks, &search_token, values, summary));

        Ok(Box::new(ScriptedHandle {
            token,
            released: Arc::new(AtomicBool::new(false)),
            thread: Some(thread),
            outcome: None,
            interrupts: self.interrupts.clone(),
            late_interrupts: self.late_interrupts.clone(),
        }))
    }
}

struct ScriptedHandle {
    token: CancellationToken,
    /// Set once the handle is dropped; interrupts after that are late.
    released: Arc<AtomicBool>,
    thread: Option<JoinHandle<SolveOutcome>>,
    outcome: Option<SolveOutcome>,
    interrupts: Arc<AtomicUsize>,
    late_interrupts: Arc<AtomicUsize>,
}

impl SolveHandle for ScriptedHandle {
    fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.outcome = Some(thread.join().unwrap_or_else(|_| SolveOutcome::unknown()));
        }
    }

    fn outcome(&self) -> SolveOutcome {
        self.outcome.unwrap_or_else(SolveOutcome::unknown)
    }

    fn interrupter(&self) -> Interrupter {
        let token = self.token.clone();
        let released = self.released.clone();
        let interrupts = self.interrupts.clone();
        let late_interrupts = self.late_interrupts.clone();
        Interrupter::new(move || {
            interrupts.fetch_add(1, Ordering::SeqCst);
            if released.load(Ordering::SeqCst) {
                late_interrupts.fetch_add(1, Ordering::SeqCst);
            }
            token.cancel();
        })
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct PlannedValues<'a>(&'a BTreeMap<Fact, f64>);

impl ValueLookup for PlannedValues<'_> {
    fn resolve(&self, _thread_id: u32, variable: &Fact) -> Option<f64> {
        self.0.get(variable).copied()
    }
}

/// Sleeps for `duration` in safe-point slices; false if cancelled meanwhile.
fn pause(duration: Duration, token: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SAFE_POINT.min(deadline - now));
    }
}

fn search(
    plan: SolvePlan,
    callbacks: SolveCallbacks,
    token: &CancellationToken,
    values: bool,
    summary: serde_json::Value,
) -> SolveOutcome {
    let SolveCallbacks {
        mut on_model,
        on_statistics,
    } = callbacks;
    let start = Instant::now();
    let mut reported = 0u64;
    let mut interrupted = false;

    for planned in &plan.models {
        if !pause(planned.delay, token) {
            interrupted = true;
            break;
        }
        reported += 1;
        let lookup = PlannedValues(&planned.values);
        let lookup: &dyn ValueLookup = &lookup;
        let event = ModelEvent {
            number: reported,
            thread_id: 0,
            facts: planned.facts.clone(),
            cost: planned.cost.clone(),
            values: values.then_some(lookup),
        };
        if !on_model(event) {
            interrupted = true;
            break;
        }
    }

    let exhausted = !interrupted
        && match plan.tail {
            Tail::Exhaust(remaining) => pause(remaining, token),
            Tail::Endless => {
                while !token.is_cancelled() {
                    std::thread::sleep(SAFE_POINT);
                }
                false
            }
        };
    let interrupted = !exhausted;

    let satisfiability = if reported > 0 {
        Satisfiability::Satisfiable
    } else if exhausted {
        Satisfiability::Unsatisfiable
    } else {
        Satisfiability::Unknown
    };

    let mut statistics = Statistics::new();
    if let serde_json::Value::Object(summary) = summary {
        statistics.extend(summary);
    }
    statistics.insert(
        "summary".to_string(),
        json!({
            "models": { "enumerated": reported },
            "exhausted": exhausted,
            "times": { "total": start.elapsed().as_secs_f64() },
        }),
    );
    on_statistics(&mut statistics);

    SolveOutcome::new(satisfiability, exhausted, interrupted)
}
