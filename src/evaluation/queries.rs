use std::collections::BTreeSet;

use super::aggregate::{aggregate_models, build_report, compare_models};
use super::db::ResultsDb;
use super::{AggregateReport, BenchRun, ComparisonReport, ModelDelta, RunCompareReport};
use crate::error::BenchError;

/// Score deltas at or beyond this magnitude count as a change.
pub const SIGNIFICANT_DELTA: f64 = 1.0;

fn require_run(db: &ResultsDb, run_id: &str) -> anyhow::Result<BenchRun> {
    db.get_run(run_id)?
        .ok_or_else(|| BenchError::NotFound(format!("run {}", run_id)).into())
}

/// Aggregates and ranking for a stored run, recomputed from its rows.
pub fn run_report(db: &ResultsDb, run_id: &str) -> anyhow::Result<AggregateReport> {
    let run = require_run(db, run_id)?;
    let rows = db.get_results_for_run(run_id)?;
    Ok(build_report(&rows, run.score_scale))
}

/// Side-by-side comparison of selected models within one stored run.
pub fn compare_models_in_run(
    db: &ResultsDb,
    run_id: &str,
    model_names: &[String],
) -> anyhow::Result<ComparisonReport> {
    let run = require_run(db, run_id)?;
    let rows = db.get_results_for_run(run_id)?;
    Ok(compare_models(&rows, model_names, run.score_scale))
}

/// Compare two runs by matching models and diffing their average scores.
pub fn compare_runs(
    db: &ResultsDb,
    current_id: &str,
    baseline_id: &str,
) -> anyhow::Result<RunCompareReport> {
    require_run(db, current_id)?;
    require_run(db, baseline_id)?;

    let current = aggregate_models(&db.get_results_for_run(current_id)?);
    let baseline = aggregate_models(&db.get_results_for_run(baseline_id)?);

    let names: BTreeSet<&String> = current.keys().chain(baseline.keys()).collect();

    let mut per_model = Vec::new();
    let mut regressions = 0usize;
    let mut improvements = 0usize;
    let mut unchanged = 0usize;

    for name in names {
        let current_score = current.get(name).map(|m| m.average_score);
        let baseline_score = baseline.get(name).map(|m| m.average_score);

        let delta = match (current_score, baseline_score) {
            (Some(c), Some(b)) => Some(c - b),
            _ => None,
        };

        let regression = delta.map(|d| d <= -SIGNIFICANT_DELTA).unwrap_or(false);
        let improvement = delta.map(|d| d >= SIGNIFICANT_DELTA).unwrap_or(false);

        if regression {
            regressions += 1;
        } else if improvement {
            improvements += 1;
        } else {
            unchanged += 1;
        }

        per_model.push(ModelDelta {
            model_name: name.clone(),
            baseline_score,
            current_score,
            delta,
            regression,
            improvement,
        });
    }

    let avg_score_delta = {
        let deltas: Vec<f64> = per_model.iter().filter_map(|m| m.delta).collect();
        if deltas.is_empty() {
            None
        } else {
            Some(deltas.iter().sum::<f64>() / deltas.len() as f64)
        }
    };

    Ok(RunCompareReport {
        current_run_id: current_id.to_string(),
        baseline_run_id: baseline_id.to_string(),
        per_model,
        avg_score_delta,
        regressions,
        improvements,
        unchanged,
    })
}
