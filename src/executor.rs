//! Time-bounded solve attempts.
//!
//! A [`TimeBoundExecutor`] grounds the requested parts, then moves the
//! engine onto a blocking background task for the search. The foreground
//! waits for a "started" message, then for a "finished" message up to the
//! budget. When the budget runs out it interrupts the search, but only while
//! the background task still holds the interrupter, and always waits for
//! "finished" before it reads the attempt's results. The engine comes back
//! inside the "finished" message.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::console;
use crate::engine::{Engine, Interrupter, ModelCallback, ModelEvent, Part, SolveCallbacks, SolveOutcome, StatisticsCallback};
use crate::error::{Result, SolveError};
use crate::facts::{CostVector, Model, Statistics};

/// Result of one attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct AttemptReport {
    pub outcome: SolveOutcome,
    /// The most recent model, kept also when the search was cancelled.
    pub model: Option<Model>,
    /// Final statistics tree, with `result` injected.
    pub statistics: Statistics,
    /// Whether the budget ran out and the search was interrupted.
    pub cancelled: bool,
    /// Wall-clock time of the search, grounding excluded.
    pub duration: Duration,
}

/// Runs single grounding and solving attempts under a duration budget.
#[derive(Debug, Clone)]
pub struct TimeBoundExecutor {
    budget: Duration,
    values: bool,
    verbose: bool,
}

/// State written by the engine callbacks.
#[derive(Default)]
struct AttemptState {
    best: Option<Model>,
    statistics: Option<Statistics>,
    failure: Option<SolveError>,
}

/// Sent by the background task once the search is over.
struct Finished<E> {
    engine: E,
    outcome: Result<SolveOutcome>,
}

impl TimeBoundExecutor {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            values: false,
            verbose: false,
        }
    }

    /// Appends `revenue - expense` to every model's cost.
    pub fn with_values(mut self, values: bool) -> Self {
        self.values = values;
        self
    }

    /// Prints each model's facts.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Grounds `parts` and runs one search bounded by the budget.
    ///
    /// Returns the engine together with the report. Program, grounding and
    /// value resolution errors are fatal; an expired budget is not.
    pub async fn run<E: Engine>(&self, mut engine: E, parts: &[Part]) -> Result<(E, AttemptReport)> {
        console::print_grounding(parts);
        engine.ground(parts)?;
        if self.values {
            engine.prepare_values()?;
        }

        let state = Arc::new(Mutex::new(AttemptState::default()));
        let slot: Arc<Mutex<Option<Interrupter>>> = Arc::new(Mutex::new(None));
        let start = Instant::now();
        let callbacks = SolveCallbacks {
            on_model: model_callback(state.clone(), self.values, self.verbose, start),
            on_statistics: statistics_callback(state.clone()),
        };

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (finished_tx, mut finished_rx) = oneshot::channel::<Finished<E>>();
        let background_slot = slot.clone();

        tokio::task::spawn_blocking(move || {
            console::print_solving();
            let outcome = match engine.solve_async(callbacks) {
                Ok(mut handle) => {
                    *background_slot.lock() = Some(handle.interrupter());
                    let _ = started_tx.send(());
                    handle.wait();
                    background_slot.lock().take();
                    Ok(handle.outcome())
                }
                Err(e) => {
                    let _ = started_tx.send(());
                    Err(SolveError::from(e))
                }
            };
            let _ = finished_tx.send(Finished { engine, outcome });
        });

        if started_rx.await.is_err() {
            return Err(SolveError::Engine("search task ended before starting".to_string()));
        }

        let mut cancelled = false;
        let finished = match tokio::time::timeout(self.budget, &mut finished_rx).await {
            Ok(finished) => finished,
            Err(_) => {
                cancelled = cancel_if_active(&slot);
                if cancelled {
                    warn!(budget_ms = self.budget.as_millis() as u64, "Budget exhausted, interrupting search");
                }
                finished_rx.await
            }
        };
        let Finished { engine, outcome } =
            finished.map_err(|_| SolveError::Engine("search task vanished".to_string()))?;
        let outcome = outcome?;
        let duration = start.elapsed();

        let AttemptState {
            best,
            statistics,
            failure,
        } = std::mem::take(&mut *state.lock());
        if let Some(failure) = failure {
            return Err(failure);
        }

        console::print_outcome(&outcome);
        info!(
            outcome = %outcome,
            model = best.as_ref().map(|m| m.number).unwrap_or(0),
            duration_ms = duration.as_millis() as u64,
            cancelled,
            "Attempt finished"
        );

        let report = AttemptReport {
            outcome,
            model: best,
            statistics: statistics.unwrap_or_default(),
            cancelled,
            duration,
        };
        Ok((engine, report))
    }
}

/// Interrupts the search if the background task has not withdrawn the
/// interrupter yet. Holds the lock while interrupting.
fn cancel_if_active(slot: &Mutex<Option<Interrupter>>) -> bool {
    match slot.lock().as_ref() {
        Some(interrupter) => {
            interrupter.interrupt();
            true
        }
        None => false,
    }
}

fn model_callback(state: Arc<Mutex<AttemptState>>, values: bool, verbose: bool, start: Instant) -> ModelCallback {
    Box::new(move |event: ModelEvent<'_>| {
        let elapsed = start.elapsed();
        let mut cost = CostVector::from_integers(event.cost.iter().copied());
        if values {
            if let Err(e) = aggregate::augment_cost(&mut cost, event.values, event.thread_id) {
                warn!(model = event.number, error = %e, "Stopping search");
                state.lock().failure = Some(e);
                return false;
            }
        }
        let model = Model::new(event.number, event.facts, cost, elapsed);
        console::print_model(&model, verbose);
        debug!(model = model.number, cost = %model.cost, facts = model.facts.len(), "Model found");
        state.lock().best = Some(model);
        true
    })
}

fn statistics_callback(state: Arc<Mutex<AttemptState>>) -> StatisticsCallback {
    Box::new(move |tree: &mut Statistics| {
        let mut state = state.lock();
        let result = match &state.best {
            Some(model) => json!({
                "cost": model.cost,
                "elapsed": model.elapsed.as_secs_f64(),
            }),
            None => json!({}),
        };
        tree.insert("result".to_string(), result);
        state.statistics = Some(tree.clone());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, Satisfiability};
    use crate::facts::{Criterion, Fact};
    use crate::scripted::{GroundState, PlannedModel, ScriptedEngine, SolvePlan, Tail};

    fn fact(text: &str) -> Fact {
        text.parse().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_finishing_within_budget() {
        let engine = ScriptedEngine::new(|_: &GroundState| {
            SolvePlan::new(
                vec![
                    PlannedModel::new(vec![fact("travel(v1,1,2,7)")]).with_cost(vec![3]),
                    PlannedModel::new(vec![fact("travel(v1,2,1,7)")])
                        .with_cost(vec![1])
                        .with_delay(Duration::from_millis(10)),
                ],
                Tail::Exhaust(Duration::ZERO),
            )
        });
        let executor = TimeBoundExecutor::new(Duration::from_secs(5));
        let (engine, report) = executor.run(engine, &[Part::base()]).await.unwrap();

        assert_eq!(report.outcome, SolveOutcome::new(Satisfiability::Satisfiable, true, false));
        assert!(!report.cancelled);
        let model = report.model.unwrap();
        assert_eq!(model.number, 2);
        assert_eq!(model.cost, CostVector::from_integers([1]));
        assert_eq!(report.statistics["result"]["cost"], json!([1]));
        assert!(report.statistics["result"]["elapsed"].as_f64().unwrap() > 0.0);
        assert_eq!(engine.interrupts(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_budget_expiry_without_model() {
        let engine = ScriptedEngine::new(|_: &GroundState| SolvePlan::new(Vec::new(), Tail::Endless));
        let budget = Duration::from_millis(50);
        let (engine, report) = TimeBoundExecutor::new(budget)
            .run(engine, &[Part::base()])
            .await
            .unwrap();

        assert_eq!(report.outcome, SolveOutcome::unknown());
        assert!(report.cancelled);
        assert!(report.model.is_none());
        assert_eq!(report.statistics["result"], json!({}));
        assert!(report.duration >= budget);
        assert!(report.duration < budget + Duration::from_secs(1));
        assert_eq!(engine.interrupts(), 1);
        assert_eq!(engine.late_interrupts(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_budget_expiry_keeps_latest_model() {
        let engine = ScriptedEngine::new(|_: &GroundState| {
            SolvePlan::new(
                vec![
                    PlannedModel::new(vec![fact("a")]).with_cost(vec![9]),
                    PlannedModel::new(vec![fact("b")]).with_cost(vec![4]),
                ],
                Tail::Endless,
            )
        });
        let (_, report) = TimeBoundExecutor::new(Duration::from_millis(80))
            .run(engine, &[Part::base()])
            .await
            .unwrap();

        assert_eq!(report.outcome, SolveOutcome::new(Satisfiability::Satisfiable, false, true));
        assert!(report.cancelled);
        let model = report.model.unwrap();
        assert_eq!(model.number, 2);
        assert!(model.facts.contains(&fact("b")));
        assert_eq!(report.statistics["result"]["cost"], json!([4]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unsatisfiable_search() {
        let engine = ScriptedEngine::new(|_: &GroundState| SolvePlan::unsatisfiable());
        let (engine, report) = TimeBoundExecutor::new(Duration::from_secs(5))
            .run(engine, &[Part::base()])
            .await
            .unwrap();

        assert!(report.outcome.is_unsatisfiable());
        assert!(report.outcome.exhausted);
        assert!(!report.cancelled);
        assert!(report.model.is_none());
        assert_eq!(engine.interrupts(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_values_extend_cost_by_one() {
        let plan = |_: &GroundState| {
            SolvePlan::new(
                vec![PlannedModel::new(vec![fact("a")])
                    .with_cost(vec![4, 7])
                    .with_value("revenue", 50.0)
                    .with_value("expense", 20.0)],
                Tail::Exhaust(Duration::ZERO),
            )
        };

        let mut engine = ScriptedEngine::new(plan);
        engine.register_values().unwrap();
        let (_, report) = TimeBoundExecutor::new(Duration::from_secs(5))
            .with_values(true)
            .run(engine, &[Part::base()])
            .await
            .unwrap();
        let model = report.model.unwrap();
        assert_eq!(model.cost.len(), 3);
        assert_eq!(model.cost.as_slice()[2], Criterion::Real(30.0));
        let cost = report.statistics["result"]["cost"].as_array().unwrap().clone();
        assert_eq!(cost.len(), 3);
        assert_eq!(cost[2].as_f64(), Some(30.0));

        let (_, report) = TimeBoundExecutor::new(Duration::from_secs(5))
            .run(ScriptedEngine::new(plan), &[Part::base()])
            .await
            .unwrap();
        assert_eq!(report.model.unwrap().cost.len(), 2);
        assert_eq!(report.statistics["result"]["cost"], json!([4, 7]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unresolved_revenue_is_fatal() {
        let mut engine = ScriptedEngine::new(|_: &GroundState| {
            SolvePlan::new(
                vec![PlannedModel::new(vec![fact("a")]).with_value("expense", 1.0)],
                Tail::Endless,
            )
        });
        engine.register_values().unwrap();
        let result = TimeBoundExecutor::new(Duration::from_secs(5))
            .with_values(true)
            .run(engine, &[Part::base()])
            .await;
        match result {
            Err(err) => assert!(matches!(err, SolveError::ValueResolution(_)), "{}", err),
            Ok((_, report)) => panic!("expected a value resolution error, got {}", report.outcome),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_search_ending_at_deadline_is_not_interrupted_late() {
        let budget = Duration::from_millis(15);
        let plan = move |_: &GroundState| SolvePlan::new(vec![PlannedModel::new(vec![fact("a")])], Tail::Exhaust(budget));
        let executor = TimeBoundExecutor::new(budget);

        for _ in 0..30 {
            let (engine, report) = executor.run(ScriptedEngine::new(plan), &[Part::base()]).await.unwrap();

            assert_eq!(engine.late_interrupts(), 0);
            assert!(engine.interrupts() <= 1);
            assert_eq!(report.cancelled, engine.interrupts() == 1);
            assert!(report.outcome.is_satisfiable());
            assert!(report.model.is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_grounding_same_parts_twice() {
        let engine = ScriptedEngine::new(|_: &GroundState| SolvePlan::unsatisfiable());
        let executor = TimeBoundExecutor::new(Duration::from_secs(5));
        let (engine, _) = executor.run(engine, &[Part::base()]).await.unwrap();
        let (engine, report) = executor.run(engine, &[Part::base()]).await.unwrap();

        assert_eq!(engine.state().parts(), [Part::base()]);
        assert_eq!(engine.state().solve_calls(), 2);
        assert_eq!(report.statistics["problem"]["parts"], 1);
        assert_eq!(report.statistics["calls"], 2);
    }
}
