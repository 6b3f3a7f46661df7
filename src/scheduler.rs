//! Iterative, period-by-period solving.
//!
//! Each period grounds its own parts on top of everything grounded before,
//! runs one time-bounded attempt, and commits the decisions of its model as
//! `occurred` externals so later periods build on them. The loop stops at
//! the first period without a model, or after the last period.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::info;

use crate::console;
use crate::engine::{Engine, Part, SolveOutcome};
use crate::error::Result;
use crate::executor::TimeBoundExecutor;
use crate::facts::{Fact, Model, Statistics};

/// Maximum number of periods of an iterative run.
pub const PERIODS: u32 = 6;

/// External predicate committing a decision of an earlier period.
pub const OCCURRED: &str = "occurred";

/// Whether every demand must be loaded, or loading is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Loading {
    Required,
    #[default]
    Optional,
}

impl Loading {
    /// Name of the program part enforcing this loading policy.
    ///
    /// ```
    /// use fleet_scheduling::scheduler::Loading;
    ///
    /// assert_eq!(Loading::Required.part_name(), "req");
    /// assert_eq!(Loading::Optional.part_name(), "opt");
    /// ```
    pub fn part_name(self) -> &'static str {
        match self {
            Loading::Required => "req",
            Loading::Optional => "opt",
        }
    }
}

/// Progress of an iterative run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationState {
    /// Next period to solve.
    pub period: u32,
    /// Committed `occurred` externals; only ever grows.
    pub occurred: BTreeSet<Fact>,
    /// Statistics of every satisfiable period.
    pub statistics: BTreeMap<u32, Statistics>,
    /// Model of the last satisfiable period.
    pub model: Option<Model>,
}

/// Result of an iterative run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleReport {
    pub state: IterationState,
    /// Outcome of the last attempt.
    pub outcome: SolveOutcome,
    /// The period without a model, if the run stopped early.
    pub stopped_at: Option<u32>,
}

impl ScheduleReport {
    /// Number of periods that produced a model.
    pub fn periods_solved(&self) -> usize {
        self.state.statistics.len()
    }
}

/// Runs a bounded sequence of periods, each with an equal share of the budget.
#[derive(Debug, Clone)]
pub struct IterativeScheduler {
    periods: u32,
    budget: Duration,
    loading: Loading,
    include_cost: bool,
    values: bool,
    verbose: bool,
}

impl IterativeScheduler {
    /// A scheduler splitting `budget` over [`PERIODS`] periods.
    pub fn new(budget: Duration) -> Self {
        Self {
            periods: PERIODS,
            budget,
            loading: Loading::default(),
            include_cost: false,
            values: false,
            verbose: false,
        }
    }

    pub fn with_periods(mut self, periods: u32) -> Self {
        self.periods = periods.max(1);
        self
    }

    pub fn with_loading(mut self, loading: Loading) -> Self {
        self.loading = loading;
        self
    }

    pub fn with_cost(mut self, include_cost: bool) -> Self {
        self.include_cost = include_cost;
        self
    }

    pub fn with_values(mut self, values: bool) -> Self {
        self.values = values;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn periods(&self) -> u32 {
        self.periods
    }

    /// Budget of a single period. Time a period leaves unused is not passed on.
    ///
    /// ```
    /// use std::time::Duration;
    /// use fleet_scheduling::scheduler::IterativeScheduler;
    ///
    /// let scheduler = IterativeScheduler::new(Duration::from_secs(300));
    /// assert_eq!(scheduler.period_budget(), Duration::from_secs(50));
    /// ```
    pub fn period_budget(&self) -> Duration {
        self.budget / self.periods
    }

    /// Parts grounded for `period`, in grounding order.
    pub fn parts(&self, period: u32) -> Vec<Part> {
        let index = i64::from(period);
        let mut parts = vec![
            Part::base(),
            Part::new("inc", vec![index]),
            Part::new(self.loading.part_name(), vec![index]),
        ];
        if self.include_cost {
            parts.push(Part::new("cost", vec![index]));
        }
        parts
    }

    /// Solves period after period until one has no model or all are done.
    pub async fn run<E: Engine>(&self, mut engine: E) -> Result<(E, ScheduleReport)> {
        let budget = self.period_budget();
        let executor = TimeBoundExecutor::new(budget)
            .with_values(self.values)
            .with_verbose(self.verbose);
        let mut state = IterationState::default();
        let mut outcome = SolveOutcome::unknown();
        let mut stopped_at = None;

        for period in 0..self.periods {
            console::print_period_start(period + 1, self.periods, budget);
            info!(period, budget_ms = budget.as_millis() as u64, "Starting period");

            let (returned, report) = executor.run(engine, &self.parts(period)).await?;
            engine = returned;
            outcome = report.outcome;

            if !outcome.is_satisfiable() {
                info!(period, outcome = %outcome, "Period has no model, stopping");
                stopped_at = Some(period);
                break;
            }

            state.statistics.insert(period, report.statistics);
            if let Some(model) = report.model {
                for fact in &model.facts {
                    let occurred = Fact::new(OCCURRED, fact.arguments().to_vec());
                    engine.assign_external(&occurred, true)?;
                    state.occurred.insert(occurred);
                }
                info!(period, committed = state.occurred.len(), "Committed period decisions");
                state.model = Some(model);
            }
            state.period = period + 1;
        }

        let report = ScheduleReport {
            state,
            outcome,
            stopped_at,
        };
        Ok((engine, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Satisfiability;
    use crate::scripted::{GroundState, PlannedModel, ScriptedEngine, SolvePlan, Tail};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// One model per period, deciding a trip in the latest `inc` period.
    fn trip_plan(state: &GroundState) -> SolvePlan {
        let period = state
            .latest("inc")
            .and_then(|part| part.arguments.first().copied())
            .unwrap_or(0);
        let trip: Fact = format!("travel(v1,1,2,{})", period).parse().unwrap();
        SolvePlan::new(
            vec![PlannedModel::new(vec![trip]).with_cost(vec![period])],
            Tail::Exhaust(Duration::ZERO),
        )
    }

    #[test]
    fn test_period_parts() {
        let scheduler = IterativeScheduler::new(Duration::from_secs(60))
            .with_loading(Loading::Required)
            .with_cost(true);
        assert_eq!(
            scheduler.parts(3),
            vec![
                Part::base(),
                Part::new("inc", vec![3]),
                Part::new("req", vec![3]),
                Part::new("cost", vec![3]),
            ]
        );

        let scheduler = IterativeScheduler::new(Duration::from_secs(60));
        assert_eq!(scheduler.parts(0).len(), 3);
        assert_eq!(scheduler.parts(0)[2], Part::new("opt", vec![0]));
    }

    #[test]
    fn test_period_budget_division() {
        let scheduler = IterativeScheduler::new(Duration::from_secs(60)).with_periods(4);
        assert_eq!(scheduler.period_budget(), Duration::from_secs(15));
        assert_eq!(IterativeScheduler::new(Duration::from_secs(1)).with_periods(0).periods(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_all_periods_satisfiable() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let engine = ScriptedEngine::new(move |state: &GroundState| {
            record.lock().push(state.true_externals());
            trip_plan(state)
        });
        let scheduler = IterativeScheduler::new(Duration::from_secs(6));
        let (engine, report) = scheduler.run(engine).await.unwrap();

        assert_eq!(report.stopped_at, None);
        assert_eq!(report.periods_solved(), PERIODS as usize);
        assert_eq!(report.state.period, PERIODS);
        assert_eq!(
            report.state.statistics.keys().copied().collect::<Vec<_>>(),
            (0..PERIODS).collect::<Vec<_>>()
        );
        assert_eq!(engine.state().solve_calls(), u64::from(PERIODS));
        assert!(report.outcome.is_satisfiable());

        let model = report.state.model.unwrap();
        assert!(model.facts.contains(&"travel(v1,1,2,5)".parse().unwrap()));
        assert_eq!(report.state.occurred.len(), PERIODS as usize);
        assert!(report.state.occurred.contains(&"occurred(v1,1,2,0)".parse().unwrap()));

        // Externals seen by each search only ever grow.
        let seen = seen.lock();
        assert_eq!(seen.len(), PERIODS as usize);
        assert!(seen[0].is_empty());
        for pair in seen.windows(2) {
            assert!(pair[0].is_subset(&pair[1]));
            assert_eq!(pair[1].len(), pair[0].len() + 1);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stops_at_first_infeasible_period() {
        let engine = ScriptedEngine::new(|state: &GroundState| {
            if state.solve_calls() == 3 {
                SolvePlan::unsatisfiable()
            } else {
                trip_plan(state)
            }
        });
        let (engine, report) = IterativeScheduler::new(Duration::from_secs(6))
            .with_cost(true)
            .run(engine)
            .await
            .unwrap();

        assert_eq!(report.stopped_at, Some(2));
        assert_eq!(report.outcome.satisfiability, Satisfiability::Unsatisfiable);
        assert_eq!(
            report.state.statistics.keys().copied().collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(report.state.period, 2);
        assert_eq!(engine.state().solve_calls(), 3);
        assert!(engine.state().is_grounded("cost"));

        let model = report.state.model.unwrap();
        assert!(model.facts.contains(&"travel(v1,1,2,1)".parse().unwrap()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_budget_expiry_in_first_period() {
        let engine = ScriptedEngine::new(|_: &GroundState| SolvePlan::new(Vec::new(), Tail::Endless));
        let (engine, report) = IterativeScheduler::new(Duration::from_millis(120))
            .run(engine)
            .await
            .unwrap();

        assert_eq!(report.stopped_at, Some(0));
        assert!(report.outcome.is_unknown());
        assert!(report.state.statistics.is_empty());
        assert!(report.state.model.is_none());
        assert_eq!(engine.interrupts(), 1);
        assert_eq!(engine.late_interrupts(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parts_accumulate_across_periods() {
        let engine = ScriptedEngine::new(trip_plan);
        let (engine, _) = IterativeScheduler::new(Duration::from_secs(3))
            .with_periods(3)
            .with_loading(Loading::Required)
            .run(engine)
            .await
            .unwrap();

        let parts = engine.state().parts();
        // `base` is grounded once, then inc/req per period.
        assert_eq!(parts.len(), 1 + 2 * 3);
        assert_eq!(parts[0], Part::base());
        assert_eq!(engine.state().latest("req"), Some(&Part::new("req", vec![2])));
    }
}
