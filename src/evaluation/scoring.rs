use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::debug;

use super::{Evaluation, ExecutionResult, KeywordMatch, QualityMetrics, SyntaxResult};
use crate::error::BenchError;

// Signal keys understood by the scoring engine.
pub const SYNTAX_VALID: &str = "syntax_valid";
pub const RUNS_WITHOUT_ERROR: &str = "runs_without_error";
pub const CONTAINS_EXPECTED_KEYWORDS: &str = "contains_expected_keywords";
pub const KEYWORD_MATCH_RATIO: &str = "keyword_match_ratio";
pub const HAS_FUNCTION_DEF: &str = "has_function_def";
pub const HAS_CLASS_DEF: &str = "has_class_def";
pub const HAS_DOCSTRING: &str = "has_docstring";
pub const HAS_COMMENTS: &str = "has_comments";
pub const HAS_ERROR_HANDLING: &str = "has_error_handling";
pub const HAS_IMPORTS: &str = "has_imports";
pub const CODE_LENGTH_REASONABLE: &str = "code_length_reasonable";

pub const KNOWN_SIGNALS: &[&str] = &[
    SYNTAX_VALID,
    RUNS_WITHOUT_ERROR,
    CONTAINS_EXPECTED_KEYWORDS,
    KEYWORD_MATCH_RATIO,
    HAS_FUNCTION_DEF,
    HAS_CLASS_DEF,
    HAS_DOCSTRING,
    HAS_COMMENTS,
    HAS_ERROR_HANDLING,
    HAS_IMPORTS,
    CODE_LENGTH_REASONABLE,
];

/// Non-empty line counts that earn `code_length_reasonable`.
pub const REASONABLE_LINE_RANGE: RangeInclusive<usize> = 2..=150;

pub const DEFAULT_WEIGHTS: &[(&str, f64)] = &[
    (SYNTAX_VALID, 3.0),
    (RUNS_WITHOUT_ERROR, 2.5),
    (CONTAINS_EXPECTED_KEYWORDS, 2.0),
    (HAS_FUNCTION_DEF, 1.5),
    (HAS_ERROR_HANDLING, 1.0),
    (HAS_DOCSTRING, 1.0),
    (HAS_IMPORTS, 0.5),
    (CODE_LENGTH_REASONABLE, 0.5),
];

/// Signal name -> non-negative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct WeightTable(BTreeMap<String, f64>);

impl WeightTable {
    pub fn new(weights: BTreeMap<String, f64>) -> Result<Self, BenchError> {
        for (key, &value) in &weights {
            if !value.is_finite() || value < 0.0 {
                return Err(BenchError::InvalidWeight {
                    key: key.clone(),
                    value,
                });
            }
        }
        Ok(WeightTable(weights))
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Highest attainable composite score: every signal fully earned.
    pub fn max_score(&self) -> f64 {
        self.0.values().sum()
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        WeightTable(
            DEFAULT_WEIGHTS
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        )
    }
}

impl TryFrom<BTreeMap<String, f64>> for WeightTable {
    type Error = BenchError;

    fn try_from(weights: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        WeightTable::new(weights)
    }
}

impl From<WeightTable> for BTreeMap<String, f64> {
    fn from(table: WeightTable) -> Self {
        table.0
    }
}

/// Borrowed view of the component results a score is computed from.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub syntax: &'a SyntaxResult,
    pub execution: Option<&'a ExecutionResult>,
    pub quality: &'a QualityMetrics,
    pub keywords: &'a KeywordMatch,
}

impl<'a> ScoreInputs<'a> {
    pub fn from_evaluation(eval: &'a Evaluation) -> Self {
        ScoreInputs {
            syntax: &eval.syntax,
            execution: eval.execution.as_ref(),
            quality: &eval.quality_metrics,
            keywords: &eval.keyword_match,
        }
    }

    /// Indicator for one signal: 1.0/0.0 for booleans, the value for ratios.
    pub fn signal(&self, key: &str) -> Option<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let value = match key {
            SYNTAX_VALID => flag(self.syntax.is_valid),
            RUNS_WITHOUT_ERROR => flag(self.execution.map(|e| e.ran_without_error).unwrap_or(false)),
            CONTAINS_EXPECTED_KEYWORDS => flag(self.keywords.any_found),
            KEYWORD_MATCH_RATIO => self.keywords.match_ratio,
            HAS_FUNCTION_DEF => flag(self.quality.has_function_def),
            HAS_CLASS_DEF => flag(self.quality.has_class_def),
            HAS_DOCSTRING => flag(self.quality.has_docstring),
            HAS_COMMENTS => flag(self.quality.has_comments),
            HAS_ERROR_HANDLING => flag(self.quality.has_error_handling),
            HAS_IMPORTS => flag(self.quality.imports_used > 0),
            CODE_LENGTH_REASONABLE => flag(REASONABLE_LINE_RANGE.contains(&self.quality.line_count)),
            _ => return None,
        };
        Some(value)
    }
}

/// Pure weighted sum of signal indicators. No normalization.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    weights: WeightTable,
}

impl ScoringEngine {
    pub fn new(weights: WeightTable) -> Self {
        for (key, _) in weights.iter() {
            if !KNOWN_SIGNALS.contains(&key) {
                debug!("Weight '{}' matches no signal and will contribute 0", key);
            }
        }
        Self { weights }
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn max_score(&self) -> f64 {
        self.weights.max_score()
    }

    pub fn score(&self, inputs: &ScoreInputs<'_>) -> f64 {
        // BTreeMap order keeps the summation order, and so the float result, fixed.
        self.weights
            .iter()
            .filter_map(|(key, weight)| inputs.signal(key).map(|v| weight * v))
            .sum()
    }

    /// Recompute from an evaluation's stored fields.
    pub fn rescore(&self, eval: &Evaluation) -> f64 {
        self.score(&ScoreInputs::from_evaluation(eval))
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(WeightTable::default())
    }
}
