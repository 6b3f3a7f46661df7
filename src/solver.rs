//! Solve entry point for fleet scheduling.
//!
//! Prepares an engine for an instance (continuous-value extension, instance
//! facts, mode-specific encoding), then runs either a single time-bounded
//! attempt or the iterative period loop, and writes the requested artifacts.

use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::aggregate::{self, RunResult, StatisticsPayload};
use crate::console;
use crate::engine::{Engine, Part, ProgramSource};
use crate::error::Result;
use crate::executor::TimeBoundExecutor;
use crate::facts::Instance;
use crate::scheduler::{IterativeScheduler, Loading, PERIODS};

/// Default solving time: 300 seconds.
const DEFAULT_TIME_LIMIT_SECS: u64 = 300;

/// How the horizon is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveMode {
    /// The whole horizon in a single attempt.
    #[default]
    OneShot,
    /// Period by period, committing each period's decisions.
    Iterative,
}

impl SolveMode {
    /// Returns the mode as a SCREAMING_SNAKE_CASE string for logs.
    ///
    /// ```
    /// use fleet_scheduling::solver::SolveMode;
    ///
    /// assert_eq!(SolveMode::OneShot.as_str(), "ONE_SHOT");
    /// assert_eq!(SolveMode::Iterative.as_str(), "ITERATIVE");
    /// ```
    pub fn as_str(self) -> &'static str {
        match self {
            SolveMode::OneShot => "ONE_SHOT",
            SolveMode::Iterative => "ITERATIVE",
        }
    }
}

/// Solver configuration.
#[derive(Debug, Clone, Default)]
pub struct SolverConfig {
    /// Total budget; split evenly over the periods in iterative mode.
    pub time_limit: Duration,
    pub mode: SolveMode,
    /// Number of periods in iterative mode.
    pub periods: u32,
    pub loading: Loading,
    /// Ground the `cost` part.
    pub include_cost: bool,
    /// Use the continuous-value extension and the linear encodings.
    pub include_quantities: bool,
    /// Print every model.
    pub verbose: bool,
    /// Directory holding the encodings; without one only the instance is loaded.
    pub encodings: Option<PathBuf>,
    pub solution_path: Option<PathBuf>,
    pub statistics_path: Option<PathBuf>,
}

impl SolverConfig {
    /// Creates a one-shot config with the default 300-second time limit.
    pub fn default_config() -> Self {
        Self {
            time_limit: Duration::from_secs(DEFAULT_TIME_LIMIT_SECS),
            periods: PERIODS,
            ..Default::default()
        }
    }

    /// Path of the encoding for this configuration, if an encodings directory is set.
    pub fn encoding_path(&self) -> Option<PathBuf> {
        self.encodings
            .as_ref()
            .map(|dir| dir.join(encoding_name(self.mode, self.include_quantities)))
    }
}

/// File name of the encoding for a mode.
///
/// ```
/// use fleet_scheduling::solver::{encoding_name, SolveMode};
///
/// assert_eq!(encoding_name(SolveMode::OneShot, false), "base_enc.lp");
/// assert_eq!(encoding_name(SolveMode::Iterative, true), "inc_linear.lp");
/// ```
pub fn encoding_name(mode: SolveMode, quantities: bool) -> &'static str {
    match (mode, quantities) {
        (SolveMode::OneShot, false) => "base_enc.lp",
        (SolveMode::OneShot, true) => "base_linear.lp",
        (SolveMode::Iterative, false) => "inc_enc.lp",
        (SolveMode::Iterative, true) => "inc_linear.lp",
    }
}

/// Loads the instance and the encoding into a fresh engine.
///
/// The continuous-value extension is registered before anything is loaded.
pub fn prepare<E: Engine>(engine: &mut E, instance: &Instance, config: &SolverConfig) -> Result<()> {
    if config.include_quantities {
        engine.register_values()?;
    }
    engine.load(ProgramSource::Text(instance.render()))?;
    if let Some(path) = config.encoding_path() {
        info!(encoding = %path.display(), "Loading encoding");
        engine.load(ProgramSource::File(path))?;
    }
    Ok(())
}

/// Prepares the engine, solves, and writes the configured artifacts.
pub async fn solve<E: Engine>(mut engine: E, instance: &Instance, config: &SolverConfig) -> Result<(E, RunResult)> {
    let run_id = Uuid::new_v4();
    let span = info_span!("solve", run_id = %run_id, mode = config.mode.as_str());

    async move {
        let start = Instant::now();
        info!(
            facts = instance.len(),
            horizon = instance.horizon().unwrap_or(0),
            time_limit_secs = config.time_limit.as_secs_f64(),
            "Starting solve"
        );
        prepare(&mut engine, instance, config)?;

        let (engine, result, periods) = match config.mode {
            SolveMode::OneShot => {
                let mut parts = vec![Part::base(), Part::new(config.loading.part_name(), Vec::new())];
                if config.include_cost {
                    parts.push(Part::new("cost", Vec::new()));
                }
                let executor = TimeBoundExecutor::new(config.time_limit)
                    .with_values(config.include_quantities)
                    .with_verbose(config.verbose);
                let (engine, report) = executor.run(engine, &parts).await?;
                let result = RunResult {
                    model: report.model,
                    statistics: StatisticsPayload::Single(report.statistics),
                    outcome: report.outcome,
                };
                (engine, result, None)
            }
            SolveMode::Iterative => {
                let scheduler = IterativeScheduler::new(config.time_limit)
                    .with_periods(config.periods)
                    .with_loading(config.loading)
                    .with_cost(config.include_cost)
                    .with_values(config.include_quantities)
                    .with_verbose(config.verbose);
                let (engine, report) = scheduler.run(engine).await?;
                let periods = report.periods_solved();
                let result = RunResult {
                    model: report.state.model,
                    statistics: StatisticsPayload::Periods(report.state.statistics),
                    outcome: report.outcome,
                };
                (engine, result, Some(periods))
            }
        };

        let total_duration = start.elapsed();
        console::print_run_ended(total_duration, &result.outcome, result.model.as_ref(), periods);
        aggregate::write_outputs(
            &result,
            config.solution_path.as_deref(),
            config.statistics_path.as_deref(),
        )?;

        info!(
            duration_secs = total_duration.as_secs_f64(),
            outcome = %result.outcome,
            cost = %result.model.as_ref().map(|m| m.cost.to_string()).unwrap_or_default(),
            "Solve complete"
        );
        Ok((engine, result))
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo_data::{DemoData, DispatchBehaviour};
    use crate::error::SolveError;
    use crate::scripted::ScriptedEngine;
    use std::fs;

    fn demo_engine() -> ScriptedEngine<DispatchBehaviour> {
        ScriptedEngine::new(DispatchBehaviour::new(Duration::ZERO))
    }

    #[test]
    fn test_default_config() {
        let config = SolverConfig::default_config();
        assert_eq!(config.time_limit, Duration::from_secs(300));
        assert_eq!(config.mode, SolveMode::OneShot);
        assert_eq!(config.periods, 6);
        assert_eq!(config.loading, Loading::Optional);
        assert!(config.encoding_path().is_none());
    }

    #[test]
    fn test_prepare_loads_instance_and_encoding() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("inc_linear.lp"), "#show travel/4.\n").unwrap();
        let config = SolverConfig {
            mode: SolveMode::Iterative,
            include_quantities: true,
            encodings: Some(dir.path().to_path_buf()),
            ..SolverConfig::default_config()
        };
        let instance = DemoData::Small.generate().unwrap();
        let mut engine = demo_engine();
        prepare(&mut engine, &instance, &config).unwrap();

        assert!(engine.state().values_registered());
        assert_eq!(engine.state().facts().len(), instance.len());
        assert_eq!(engine.state().rules(), ["#show travel/4".to_string()]);
    }

    #[test]
    fn test_prepare_missing_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let config = SolverConfig {
            encodings: Some(dir.path().to_path_buf()),
            ..SolverConfig::default_config()
        };
        let err = prepare(&mut demo_engine(), &DemoData::Small.generate().unwrap(), &config).unwrap_err();
        assert!(matches!(err, SolveError::Io { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_one_shot_solve_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = SolverConfig {
            time_limit: Duration::from_secs(5),
            include_cost: true,
            solution_path: Some(dir.path().join("out").join("solution.lp")),
            statistics_path: Some(dir.path().join("out").join("statistics.json")),
            ..SolverConfig::default_config()
        };
        let instance = DemoData::Small.generate().unwrap();
        let (engine, result) = solve(demo_engine(), &instance, &config).await.unwrap();

        assert!(result.outcome.is_satisfiable());
        assert!(engine.state().is_grounded("opt"));
        assert!(engine.state().is_grounded("cost"));
        let model = result.model.unwrap();
        assert_eq!(model.cost.len(), 2);

        let solution = fs::read_to_string(dir.path().join("out/solution.lp")).unwrap();
        assert_eq!(solution, model.render());
        assert!(solution.lines().all(|line| line.starts_with("travel(") && line.ends_with(").")));

        let statistics: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("out/statistics.json")).unwrap()).unwrap();
        assert_eq!(statistics["result"]["cost"].as_array().unwrap().len(), 2);
        assert_eq!(statistics["summary"]["models"]["enumerated"], 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_iterative_solve_keys_statistics_by_period() {
        let dir = tempfile::tempdir().unwrap();
        let statistics_path = dir.path().join("statistics.json");
        let config = SolverConfig {
            time_limit: Duration::from_secs(6),
            mode: SolveMode::Iterative,
            loading: Loading::Required,
            statistics_path: Some(statistics_path.clone()),
            ..SolverConfig::default_config()
        };
        let instance = DemoData::Small.generate().unwrap();
        let (engine, result) = solve(demo_engine(), &instance, &config).await.unwrap();

        assert_eq!(engine.state().solve_calls(), 6);
        assert!(matches!(&result.statistics, StatisticsPayload::Periods(periods) if periods.len() == 6));
        // The last model carries the decisions of every month.
        let months: std::collections::BTreeSet<i64> = result
            .model
            .unwrap()
            .facts
            .iter()
            .filter_map(|fact| fact.integer(3))
            .collect();
        assert_eq!(months.len(), 6);

        let text = fs::read_to_string(&statistics_path).unwrap();
        let statistics: serde_json::Value = serde_json::from_str(&text).unwrap();
        let keys: Vec<&String> = statistics.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["0", "1", "2", "3", "4", "5"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_solution_file_empty_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let solution_path = dir.path().join("solution.lp");
        let config = SolverConfig {
            time_limit: Duration::from_secs(5),
            loading: Loading::Required,
            solution_path: Some(solution_path.clone()),
            ..SolverConfig::default_config()
        };
        // A month without any available vehicle cannot be loaded.
        let instance = Instance::parse(
            "node(1). node(2). arc(2,1,5). month(7,0,30). demand(2,7,4). vehicle(v1,10).",
        )
        .unwrap();
        let (_, result) = solve(demo_engine(), &instance, &config).await.unwrap();

        assert!(result.outcome.is_unsatisfiable());
        assert!(result.model.is_none());
        assert_eq!(fs::read_to_string(&solution_path).unwrap(), "");
    }
}
