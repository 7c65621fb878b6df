use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::{
    AggregateReport, AttemptRecord, ComparisonReport, ModelAggregate, ModelComparison,
    RankingEntry, ResultRow, RunSummary,
};

/// What aggregation needs from one attempt, wherever it was loaded from.
pub trait Attempt {
    fn model_name(&self) -> &str;
    fn succeeded(&self) -> bool;
    /// `None` for failed attempts.
    fn composite_score(&self) -> Option<f64>;
    fn response_time_seconds(&self) -> f64;
}

impl<T: Attempt + ?Sized> Attempt for &T {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
    fn succeeded(&self) -> bool {
        (**self).succeeded()
    }
    fn composite_score(&self) -> Option<f64> {
        (**self).composite_score()
    }
    fn response_time_seconds(&self) -> f64 {
        (**self).response_time_seconds()
    }
}

impl Attempt for AttemptRecord {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn succeeded(&self) -> bool {
        self.success
    }
    fn composite_score(&self) -> Option<f64> {
        AttemptRecord::composite_score(self)
    }
    fn response_time_seconds(&self) -> f64 {
        self.response_time_seconds
    }
}

impl Attempt for ResultRow {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn succeeded(&self) -> bool {
        self.success
    }
    fn composite_score(&self) -> Option<f64> {
        self.composite_score
    }
    fn response_time_seconds(&self) -> f64 {
        self.response_time_seconds
    }
}

#[derive(Default)]
struct Tally {
    total: usize,
    successful: usize,
    score_sum: f64,
    time_sum: f64,
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Group attempts by model. Order of `attempts` does not matter.
pub fn aggregate_models<A: Attempt>(attempts: &[A]) -> BTreeMap<String, ModelAggregate> {
    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();

    for attempt in attempts {
        let tally = tallies.entry(attempt.model_name()).or_default();
        tally.total += 1;
        if attempt.succeeded() {
            tally.successful += 1;
            tally.score_sum += attempt.composite_score().unwrap_or(0.0);
            tally.time_sum += attempt.response_time_seconds();
        }
    }

    tallies
        .into_iter()
        .map(|(name, t)| {
            let aggregate = ModelAggregate {
                model_name: name.to_string(),
                total_attempts: t.total,
                successful_attempts: t.successful,
                success_rate: percent(t.successful, t.total),
                average_score: mean(t.score_sum, t.successful),
                average_response_time_seconds: mean(t.time_sum, t.successful),
            };
            (name.to_string(), aggregate)
        })
        .collect()
}

/// Score descending, then success rate descending, then name ascending.
pub fn ranking_order(a: &ModelAggregate, b: &ModelAggregate) -> Ordering {
    b.average_score
        .total_cmp(&a.average_score)
        .then_with(|| b.success_rate.total_cmp(&a.success_rate))
        .then_with(|| a.model_name.cmp(&b.model_name))
}

pub fn rank<'a>(aggregates: impl IntoIterator<Item = &'a ModelAggregate>) -> Vec<RankingEntry> {
    let mut sorted: Vec<&ModelAggregate> = aggregates.into_iter().collect();
    sorted.sort_by(|a, b| ranking_order(a, b));

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, m)| RankingEntry {
            position: i + 1,
            model_name: m.model_name.clone(),
            average_score: m.average_score,
            success_rate: m.success_rate,
            average_response_time_seconds: m.average_response_time_seconds,
        })
        .collect()
}

pub fn summarize<A: Attempt>(attempts: &[A]) -> RunSummary {
    let mut models: Vec<&str> = attempts.iter().map(|a| a.model_name()).collect();
    models.sort_unstable();
    models.dedup();

    let successful: Vec<&A> = attempts.iter().filter(|a| a.succeeded()).collect();
    let time_sum: f64 = successful.iter().map(|a| a.response_time_seconds()).sum();

    RunSummary {
        models_tested: models.len(),
        total_attempts: attempts.len(),
        successful_attempts: successful.len(),
        success_rate: percent(successful.len(), attempts.len()),
        average_response_time_seconds: mean(time_sum, successful.len()),
    }
}

/// Full report for one result set. `score_scale` is the max score under the
/// weights the results were scored with.
pub fn build_report<A: Attempt>(attempts: &[A], score_scale: f64) -> AggregateReport {
    let models = aggregate_models(attempts);
    let ranking = rank(models.values());
    AggregateReport {
        score_scale,
        summary: summarize(attempts),
        models,
        ranking,
    }
}

/// Side-by-side view of selected models, flagging the best in each column.
pub fn compare_models<A: Attempt>(
    attempts: &[A],
    model_names: &[String],
    score_scale: f64,
) -> ComparisonReport {
    let selected: Vec<&A> = attempts
        .iter()
        .filter(|a| model_names.iter().any(|n| n == a.model_name()))
        .collect();
    let by_model = aggregate_models(&selected);

    let aggregates: Vec<ModelAggregate> = model_names
        .iter()
        .filter_map(|name| by_model.get(name).cloned())
        .collect();

    let best_rate = aggregates
        .iter()
        .map(|m| m.success_rate)
        .fold(f64::NEG_INFINITY, f64::max);
    let best_score = aggregates
        .iter()
        .map(|m| m.average_score)
        .fold(f64::NEG_INFINITY, f64::max);
    // Zero means "no successful attempt", not "instant".
    let best_time = aggregates
        .iter()
        .map(|m| m.average_response_time_seconds)
        .filter(|t| *t > 0.0)
        .fold(f64::INFINITY, f64::min);

    let mut seen: Vec<&str> = Vec::new();
    let mut missing_models = Vec::new();
    for name in model_names {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);
        if !by_model.contains_key(name) {
            missing_models.push(name.clone());
        }
    }

    let mut models: Vec<ModelComparison> = Vec::new();
    for aggregate in aggregates {
        if models.iter().any(|m| m.aggregate.model_name == aggregate.model_name) {
            continue;
        }
        models.push(ModelComparison {
            best_success_rate: aggregate.success_rate == best_rate,
            best_average_score: aggregate.average_score == best_score,
            best_response_time: aggregate.average_response_time_seconds == best_time,
            aggregate,
        });
    }

    ComparisonReport {
        score_scale,
        models,
        missing_models,
    }
}
