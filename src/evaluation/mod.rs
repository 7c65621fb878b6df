pub mod aggregate;
pub mod db;
pub mod engine;
pub mod export;
pub mod extract;
pub mod keywords;
pub mod quality;
pub mod queries;
pub mod sandbox;
pub mod scoring;
pub mod syntax;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::BenchError;

// ============================================================================
// Inputs (produced outside the engine)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PromptSpecFields")]
pub struct PromptSpec {
    pub name: String,
    pub prompt: String,
    pub expected_keywords: Vec<String>,
    /// Informational tag, e.g. "function_definition".
    pub expected_behavior: String,
}

#[derive(Deserialize)]
struct PromptSpecFields {
    name: String,
    prompt: String,
    #[serde(default)]
    expected_keywords: Option<Vec<String>>,
    #[serde(default)]
    expected_behavior: Option<String>,
}

impl PromptSpec {
    pub fn new(
        name: impl Into<String>,
        prompt: impl Into<String>,
        expected_keywords: Vec<String>,
        expected_behavior: impl Into<String>,
    ) -> Result<Self, BenchError> {
        let name = name.into();
        let prompt = prompt.into();
        require_non_empty("prompt name", &name)?;
        require_non_empty("prompt text", &prompt)?;
        Ok(PromptSpec {
            name,
            prompt,
            expected_keywords,
            expected_behavior: expected_behavior.into(),
        })
    }
}

impl TryFrom<PromptSpecFields> for PromptSpec {
    type Error = BenchError;

    fn try_from(f: PromptSpecFields) -> Result<Self, Self::Error> {
        PromptSpec::new(
            f.name,
            f.prompt,
            f.expected_keywords.unwrap_or_default(),
            f.expected_behavior.unwrap_or_default(),
        )
    }
}

/// A model endpoint. Only the transport layer reads `url` and the auth pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelConfigFields")]
pub struct ModelConfig {
    pub model_name: String,
    pub url: String,
    pub auth_header: Option<String>,
    pub auth_value: Option<String>,
    pub think: Option<bool>,
}

#[derive(Deserialize)]
struct ModelConfigFields {
    model_name: String,
    url: String,
    #[serde(default)]
    auth_header: Option<String>,
    #[serde(default)]
    auth_value: Option<String>,
    #[serde(default)]
    think: Option<bool>,
}

impl ModelConfig {
    pub fn new(model_name: impl Into<String>, url: impl Into<String>) -> Result<Self, BenchError> {
        let model_name = model_name.into();
        let url = url.into();
        require_non_empty("model name", &model_name)?;
        require_non_empty("model url", &url)?;
        Ok(ModelConfig {
            model_name,
            url,
            auth_header: None,
            auth_value: None,
            think: None,
        })
    }
}

impl TryFrom<ModelConfigFields> for ModelConfig {
    type Error = BenchError;

    fn try_from(f: ModelConfigFields) -> Result<Self, Self::Error> {
        let mut config = ModelConfig::new(f.model_name, f.url)?;
        // An auth header without a value (or vice versa) is dropped as a pair.
        if let (Some(header), Some(value)) = (f.auth_header, f.auth_value) {
            if !header.trim().is_empty() && !value.trim().is_empty() {
                config.auth_header = Some(header);
                config.auth_value = Some(value);
            }
        }
        config.think = f.think;
        Ok(config)
    }
}

/// One request/response pair as reported by the transport layer. When the
/// request failed, `response_text` carries the transport's error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExchangeFields")]
pub struct RawExchange {
    pub model: String,
    /// Name of the PromptSpec this exchange answers.
    pub prompt: String,
    pub response_text: String,
    pub response_time_seconds: f64,
    pub request_succeeded: bool,
}

#[derive(Deserialize)]
struct RawExchangeFields {
    model: String,
    prompt: String,
    #[serde(default)]
    response_text: String,
    response_time_seconds: f64,
    request_succeeded: bool,
}

impl RawExchange {
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
        response_text: impl Into<String>,
        response_time_seconds: f64,
        request_succeeded: bool,
    ) -> Result<Self, BenchError> {
        let model = model.into();
        let prompt = prompt.into();
        require_non_empty("exchange model", &model)?;
        require_non_empty("exchange prompt", &prompt)?;
        if !response_time_seconds.is_finite() || response_time_seconds < 0.0 {
            return Err(BenchError::InvalidRecord(format!(
                "response_time_seconds must be a non-negative number, got {}",
                response_time_seconds
            )));
        }
        Ok(RawExchange {
            model,
            prompt,
            response_text: response_text.into(),
            response_time_seconds,
            request_succeeded,
        })
    }
}

impl TryFrom<RawExchangeFields> for RawExchange {
    type Error = BenchError;

    fn try_from(f: RawExchangeFields) -> Result<Self, Self::Error> {
        RawExchange::new(
            f.model,
            f.prompt,
            f.response_text,
            f.response_time_seconds,
            f.request_succeeded,
        )
    }
}

/// Everything the external transport hands over for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInput {
    /// Declared model roster. When present, every exchange must name one of
    /// these models.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    pub prompts: Vec<PromptSpec>,
    #[serde(default)]
    pub exchanges: Vec<RawExchange>,
}

impl BatchInput {
    pub fn load(path: &Path) -> Result<Self, BenchError> {
        let content = std::fs::read_to_string(path)?;
        let batch: BatchInput = serde_json::from_str(&content)?;
        batch.validate()?;
        Ok(batch)
    }

    /// Prompt and model names must be unique within a run.
    pub fn validate(&self) -> Result<(), BenchError> {
        let mut seen = BTreeSet::new();
        for prompt in &self.prompts {
            if !seen.insert(prompt.name.as_str()) {
                return Err(BenchError::InvalidRecord(format!(
                    "duplicate prompt name: {}",
                    prompt.name
                )));
            }
        }

        let mut roster = BTreeSet::new();
        for model in &self.models {
            if !roster.insert(model.model_name.as_str()) {
                return Err(BenchError::InvalidRecord(format!(
                    "duplicate model name: {}",
                    model.model_name
                )));
            }
        }
        if !roster.is_empty() {
            if let Some(exchange) = self
                .exchanges
                .iter()
                .find(|e| !roster.contains(e.model.as_str()))
            {
                return Err(BenchError::InvalidRecord(format!(
                    "exchange references undeclared model: {}",
                    exchange.model
                )));
            }
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), BenchError> {
    if value.trim().is_empty() {
        return Err(BenchError::InvalidRecord(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ============================================================================
// Component results
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSnippet {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
}

impl SyntaxResult {
    pub fn valid() -> Self {
        SyntaxResult {
            is_valid: true,
            error_message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        SyntaxResult {
            is_valid: false,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ran_without_error: bool,
    /// Captured stdout on success; stderr or a diagnostic on failure.
    pub stdout_or_error_text: String,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub line_count: usize,
    pub has_function_def: bool,
    pub has_class_def: bool,
    pub has_docstring: bool,
    pub has_comments: bool,
    pub has_error_handling: bool,
    pub imports_used: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub found_keywords: BTreeSet<String>,
    pub expected_keywords: Vec<String>,
    /// 1.0 when no keywords are expected.
    pub match_ratio: f64,
    pub any_found: bool,
}

/// Full judgment of one snippet against one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub extracted_code: String,
    pub syntax: SyntaxResult,
    /// Present only when `syntax.is_valid`.
    pub execution: Option<ExecutionResult>,
    pub quality_metrics: QualityMetrics,
    pub keyword_match: KeywordMatch,
    pub response_time_seconds: f64,
    pub composite_score: f64,
}

impl Evaluation {
    pub fn runs_without_error(&self) -> bool {
        self.execution
            .as_ref()
            .map(|e| e.ran_without_error)
            .unwrap_or(false)
    }
}

/// One (model, prompt) attempt. Failed transport attempts carry an `error`
/// and no evaluation body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub model_name: String,
    pub prompt_name: String,
    pub success: bool,
    pub response_time_seconds: f64,
    pub error: Option<String>,
    pub evaluation: Option<Evaluation>,
}

impl AttemptRecord {
    pub fn failed(
        model_name: impl Into<String>,
        prompt_name: impl Into<String>,
        response_time_seconds: f64,
        error: impl Into<String>,
    ) -> Self {
        AttemptRecord {
            model_name: model_name.into(),
            prompt_name: prompt_name.into(),
            success: false,
            response_time_seconds,
            error: Some(error.into()),
            evaluation: None,
        }
    }

    pub fn evaluated(
        model_name: impl Into<String>,
        prompt_name: impl Into<String>,
        evaluation: Evaluation,
    ) -> Self {
        AttemptRecord {
            model_name: model_name.into(),
            prompt_name: prompt_name.into(),
            success: true,
            response_time_seconds: evaluation.response_time_seconds,
            error: None,
            evaluation: Some(evaluation),
        }
    }

    pub fn composite_score(&self) -> Option<f64> {
        self.evaluation.as_ref().map(|e| e.composite_score)
    }
}

// ============================================================================
// Persisted / exported row
// ============================================================================

/// Flat per-attempt record; the unit written to the results DB and exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub id: i64,
    pub run_id: String,
    pub model_name: String,
    pub prompt_name: String,
    pub success: bool,
    pub response_time_seconds: f64,
    pub error: Option<String>,
    pub extracted_code: Option<String>,
    pub syntax_valid: bool,
    pub syntax_error: Option<String>,
    pub runs_without_error: bool,
    pub timed_out: bool,
    pub execution_output: Option<String>,
    pub quality_metrics: Option<QualityMetrics>,
    pub keyword_match_ratio: Option<f64>,
    pub found_keywords: Vec<String>,
    pub composite_score: Option<f64>,
}

impl ResultRow {
    pub fn from_attempt(run_id: &str, attempt: &AttemptRecord) -> Self {
        let eval = attempt.evaluation.as_ref();
        let execution = eval.and_then(|e| e.execution.as_ref());

        ResultRow {
            id: 0,
            run_id: run_id.to_string(),
            model_name: attempt.model_name.clone(),
            prompt_name: attempt.prompt_name.clone(),
            success: attempt.success,
            response_time_seconds: attempt.response_time_seconds,
            error: attempt.error.clone(),
            extracted_code: eval.map(|e| e.extracted_code.clone()),
            syntax_valid: eval.map(|e| e.syntax.is_valid).unwrap_or(false),
            syntax_error: eval.and_then(|e| e.syntax.error_message.clone()),
            runs_without_error: execution.map(|x| x.ran_without_error).unwrap_or(false),
            timed_out: execution.map(|x| x.timed_out).unwrap_or(false),
            execution_output: execution.map(|x| x.stdout_or_error_text.clone()),
            quality_metrics: eval.map(|e| e.quality_metrics.clone()),
            keyword_match_ratio: eval.map(|e| e.keyword_match.match_ratio),
            found_keywords: eval
                .map(|e| e.keyword_match.found_keywords.iter().cloned().collect())
                .unwrap_or_default(),
            composite_score: eval.map(|e| e.composite_score),
        }
    }
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAggregate {
    pub model_name: String,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    /// Percentage, 0-100.
    pub success_rate: f64,
    pub average_score: f64,
    pub average_response_time_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    /// 1-based.
    pub position: usize,
    pub model_name: String,
    pub average_score: f64,
    pub success_rate: f64,
    pub average_response_time_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub models_tested: usize,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub success_rate: f64,
    pub average_response_time_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Maximum attainable composite score under the weights in use.
    pub score_scale: f64,
    pub summary: RunSummary,
    pub models: BTreeMap<String, ModelAggregate>,
    pub ranking: Vec<RankingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub aggregate: ModelAggregate,
    pub best_success_rate: bool,
    pub best_average_score: bool,
    pub best_response_time: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub score_scale: f64,
    pub models: Vec<ModelComparison>,
    /// Requested names with no attempts in the result set.
    pub missing_models: Vec<String>,
}

// ============================================================================
// Stored runs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchRun {
    pub id: String,
    pub status: String,
    pub attempts_total: i64,
    pub attempts_completed: i64,
    pub score_scale: f64,
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompareReport {
    pub current_run_id: String,
    pub baseline_run_id: String,
    pub per_model: Vec<ModelDelta>,
    pub avg_score_delta: Option<f64>,
    pub regressions: usize,
    pub improvements: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDelta {
    pub model_name: String,
    pub baseline_score: Option<f64>,
    pub current_score: Option<f64>,
    pub delta: Option<f64>,
    pub regression: bool,
    pub improvement: bool,
}
