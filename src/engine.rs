//! Capability interface over the external solving engine.
//!
//! An [`Engine`] accumulates a ground program (program text, facts, grounded
//! [`Part`]s, external assignments) and searches it asynchronously through
//! [`Engine::solve_async`]. Models and the final statistics tree are reported
//! through [`SolveCallbacks`]; the returned [`SolveHandle`] waits for the
//! search and exposes an [`Interrupter`] for cooperative cancellation.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::facts::{Fact, FactError, Statistics};

/// Errors reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed program text.
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("grounding error: {0}")]
    Grounding(String),
    #[error("cannot read program {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),
    #[error("engine failure: {0}")]
    Failure(String),
}

impl From<FactError> for EngineError {
    fn from(e: FactError) -> Self {
        match e {
            FactError::NotGround { .. } => EngineError::Grounding(e.to_string()),
            _ => EngineError::Syntax(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Program text or a program file to load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgramSource {
    Text(String),
    File(PathBuf),
}

/// A named, parametrized program part to ground.
///
/// ```
/// use fleet_scheduling::engine::Part;
///
/// assert_eq!(Part::new("inc", vec![3]).to_string(), "inc(3)");
/// assert_eq!(Part::base().to_string(), "base");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Part {
    pub name: String,
    pub arguments: Vec<i64>,
}

impl Part {
    pub fn new(name: impl Into<String>, arguments: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// The `base` part without arguments.
    pub fn base() -> Self {
        Self::new("base", Vec::new())
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.arguments.is_empty() {
            let arguments: Vec<String> = self.arguments.iter().map(i64::to_string).collect();
            write!(f, "({})", arguments.join(","))?;
        }
        Ok(())
    }
}

/// Whether a model exists, as far as the engine knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Satisfiability {
    Satisfiable,
    Unsatisfiable,
    Unknown,
}

/// Terminal state of one search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SolveOutcome {
    pub satisfiability: Satisfiability,
    /// The search space was fully explored.
    pub exhausted: bool,
    /// The search was stopped before finishing.
    pub interrupted: bool,
}

impl SolveOutcome {
    pub fn new(satisfiability: Satisfiability, exhausted: bool, interrupted: bool) -> Self {
        Self {
            satisfiability,
            exhausted,
            interrupted,
        }
    }

    /// Outcome of a search that ended without any definite answer.
    pub fn unknown() -> Self {
        Self::new(Satisfiability::Unknown, false, true)
    }

    pub fn is_satisfiable(&self) -> bool {
        self.satisfiability == Satisfiability::Satisfiable
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.satisfiability == Satisfiability::Unsatisfiable
    }

    pub fn is_unknown(&self) -> bool {
        self.satisfiability == Satisfiability::Unknown
    }
}

impl fmt::Display for SolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.satisfiability {
            Satisfiability::Satisfiable => "SAT",
            Satisfiability::Unsatisfiable => "UNSAT",
            Satisfiability::Unknown => "UNKNOWN",
        };
        write!(f, "{}", label)?;
        if self.exhausted {
            write!(f, " (exhausted)")?;
        }
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Resolved values of continuous variables for the current model.
pub trait ValueLookup {
    /// Returns the value of `variable` in the model found by `thread_id`,
    /// or `None` if the engine does not know the variable.
    fn resolve(&self, thread_id: u32, variable: &Fact) -> Option<f64>;
}

/// A model as reported to [`SolveCallbacks::on_model`].
pub struct ModelEvent<'a> {
    /// Model number within this search (1-based).
    pub number: u64,
    pub thread_id: u32,
    /// Visible facts.
    pub facts: Vec<Fact>,
    pub cost: Vec<i64>,
    /// Present when the continuous-value extension is registered; only valid
    /// during the callback.
    pub values: Option<&'a dyn ValueLookup>,
}

/// Called for every model; returning `false` stops the search.
pub type ModelCallback = Box<dyn for<'a> FnMut(ModelEvent<'a>) -> bool + Send>;

/// Called once after the search stopped, with the statistics tree.
pub type StatisticsCallback = Box<dyn FnOnce(&mut Statistics) + Send>;

pub struct SolveCallbacks {
    pub on_model: ModelCallback,
    pub on_statistics: StatisticsCallback,
}

/// Sendable capability to request cooperative cancellation of a search.
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(interrupt: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(interrupt))
    }

    /// Asks the search to stop at its next safe point.
    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

/// A running search.
pub trait SolveHandle {
    /// Blocks until the search is exhausted, proven unsatisfiable, or cancelled.
    fn wait(&mut self);

    /// Terminal outcome; meaningful only after [`SolveHandle::wait`] returned.
    fn outcome(&self) -> SolveOutcome;

    fn interrupter(&self) -> Interrupter;

    fn cancel(&self) {
        self.interrupter().interrupt()
    }
}

/// The solving engine.
///
/// An engine is owned by one control path at a time; the executor moves it
/// onto its background path for the duration of a search and back.
pub trait Engine: Send + 'static {
    /// Appends program text or a program file.
    fn load(&mut self, source: ProgramSource) -> Result<()>;

    fn add_facts(&mut self, facts: &[Fact]) -> Result<()>;

    /// Grounds the given parts. Grounding is additive and an identical part
    /// grounded twice is a no-op.
    fn ground(&mut self, parts: &[Part]) -> Result<()>;

    /// Sets the truth value of an external fact.
    fn assign_external(&mut self, fact: &Fact, value: bool) -> Result<()>;

    /// Enables the continuous-value extension; must precede [`Engine::load`].
    fn register_values(&mut self) -> Result<()> {
        Err(EngineError::Unsupported("continuous values"))
    }

    /// Prepares the continuous-value extension after grounding.
    fn prepare_values(&mut self) -> Result<()> {
        Ok(())
    }

    /// Starts a search on the engine's own background path.
    fn solve_async(&mut self, callbacks: SolveCallbacks) -> Result<Box<dyn SolveHandle + '_>>;
}
