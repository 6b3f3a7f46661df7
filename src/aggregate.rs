//! Result aggregation and artifact output.
//!
//! - [`augment_cost`] appends `revenue - expense` to a model's cost vector
//!   when the continuous-value extension is active.
//! - [`write_solution`] writes one `fact.` line per model fact.
//! - [`write_statistics`] writes the statistics payload as key-ordered JSON.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::{SolveOutcome, ValueLookup};
use crate::error::{Result, SolveError};
use crate::facts::{CostVector, Criterion, Fact, Model, Statistics};

/// Continuous variable holding the revenue of a model.
pub const REVENUE: &str = "revenue";

/// Continuous variable holding the expense of a model; absent means zero.
pub const EXPENSE: &str = "expense";

/// Statistics of a run: one attempt, or one snapshot per period.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatisticsPayload {
    Single(Statistics),
    Periods(BTreeMap<u32, Statistics>),
}

/// Final artifact of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunResult {
    /// Best model of a one-shot run, or of the last successful period.
    pub model: Option<Model>,
    pub statistics: StatisticsPayload,
    /// Outcome of the last attempt.
    pub outcome: SolveOutcome,
}

/// Appends the resolved `revenue - expense` to `cost`.
///
/// Must be called while the model's values are valid, i.e. inside the model
/// callback.
pub fn augment_cost(cost: &mut CostVector, values: Option<&dyn ValueLookup>, thread_id: u32) -> Result<()> {
    let values = values.ok_or_else(|| {
        SolveError::ValueResolution("the engine reported no continuous values".to_string())
    })?;
    let revenue = values
        .resolve(thread_id, &Fact::constant(REVENUE))
        .ok_or_else(|| SolveError::ValueResolution(format!("`{}` is not a known variable", REVENUE)))?;
    let expense = values.resolve(thread_id, &Fact::constant(EXPENSE)).unwrap_or(0.0);
    cost.push(Criterion::Real(revenue - expense));
    Ok(())
}

/// Writes the model as sorted `fact.` lines; an absent model gives an empty file.
pub fn write_solution(path: &Path, model: Option<&Model>) -> Result<()> {
    create_parent(path)?;
    let text = model.map(Model::render).unwrap_or_default();
    fs::write(path, text).map_err(|e| SolveError::io(path, e))
}

/// Renders the statistics payload as JSON with sorted keys and four-space indentation.
pub fn render_statistics(statistics: &StatisticsPayload) -> Result<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    statistics.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn write_statistics(path: &Path, statistics: &StatisticsPayload) -> Result<()> {
    create_parent(path)?;
    let text = render_statistics(statistics)?;
    fs::write(path, text).map_err(|e| SolveError::io(path, e))
}

/// Writes the requested artifacts; `None` paths are skipped.
pub fn write_outputs(result: &RunResult, solution_path: Option<&Path>, statistics_path: Option<&Path>) -> Result<()> {
    if let Some(path) = solution_path {
        write_solution(path, result.model.as_ref())?;
        info!(path = %path.display(), "Wrote solution");
    }
    if let Some(path) = statistics_path {
        write_statistics(path, &result.statistics)?;
        info!(path = %path.display(), "Wrote statistics");
    }
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| SolveError::io(parent, e))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Satisfiability;
    use serde_json::json;
    use std::time::Duration;

    struct Values(Vec<(&'static str, f64)>);

    impl ValueLookup for Values {
        fn resolve(&self, _thread_id: u32, variable: &Fact) -> Option<f64> {
            self.0
                .iter()
                .find(|(name, _)| *name == variable.name())
                .map(|(_, value)| *value)
        }
    }

    fn statistics(value: serde_json::Value) -> Statistics {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_augment_appends_revenue_minus_expense() {
        let mut cost = CostVector::from_integers([0, 42]);
        let values = Values(vec![(REVENUE, 100.0), (EXPENSE, 37.5)]);
        augment_cost(&mut cost, Some(&values), 0).unwrap();
        assert_eq!(cost.len(), 3);
        assert_eq!(cost.as_slice()[2], Criterion::Real(62.5));
    }

    #[test]
    fn test_augment_defaults_missing_expense() {
        let mut cost = CostVector::new();
        let values = Values(vec![(REVENUE, 8.0)]);
        augment_cost(&mut cost, Some(&values), 0).unwrap();
        assert_eq!(cost.as_slice(), &[Criterion::Real(8.0)]);
    }

    #[test]
    fn test_augment_requires_revenue() {
        let mut cost = CostVector::from_integers([1]);
        let err = augment_cost(&mut cost, Some(&Values(vec![])), 0).unwrap_err();
        assert!(matches!(err, SolveError::ValueResolution(_)));
        assert!(matches!(
            augment_cost(&mut cost, None, 0),
            Err(SolveError::ValueResolution(_))
        ));
        assert_eq!(cost.len(), 1);
    }

    #[test]
    fn test_write_solution_sorted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("solution.lp");
        let model = Model::new(
            3,
            vec![
                "travel(v2,1,2,8)".parse().unwrap(),
                "travel(v1,3,1,7)".parse().unwrap(),
            ],
            CostVector::from_integers([5]),
            Duration::from_millis(12),
        );
        write_solution(&path, Some(&model)).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "travel(v1,3,1,7).\ntravel(v2,1,2,8).\n"
        );
    }

    #[test]
    fn test_write_solution_without_model_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.lp");
        write_solution(&path, None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_render_statistics_sorted_and_indented() {
        let payload = StatisticsPayload::Single(statistics(json!({
            "summary": { "times": { "total": 1.5 } },
            "result": { "cost": [3], "elapsed": 0.25 },
        })));
        let text = render_statistics(&payload).unwrap();
        let result_at = text.find("\"result\"").unwrap();
        let summary_at = text.find("\"summary\"").unwrap();
        assert!(result_at < summary_at);
        assert!(text.contains("\n    \"result\": {\n        \"cost\": ["));
    }

    #[test]
    fn test_render_period_statistics() {
        let mut periods = BTreeMap::new();
        periods.insert(1, statistics(json!({ "calls": 2 })));
        periods.insert(0, statistics(json!({ "calls": 1 })));
        let text = render_statistics(&StatisticsPayload::Periods(periods)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({ "0": { "calls": 1 }, "1": { "calls": 2 } }));
        assert!(text.find("\"0\"").unwrap() < text.find("\"1\"").unwrap());
    }

    #[test]
    fn test_write_outputs_skips_missing_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let statistics_path = dir.path().join("stats.json");
        let result = RunResult {
            model: None,
            statistics: StatisticsPayload::Single(Statistics::new()),
            outcome: SolveOutcome::new(Satisfiability::Unknown, false, true),
        };
        write_outputs(&result, None, Some(&statistics_path)).unwrap();
        assert_eq!(fs::read_to_string(&statistics_path).unwrap(), "{}");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
