use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::pin::pin;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::extract::SnippetExtractor;
use super::sandbox::SandboxExecutor;
use super::scoring::{ScoreInputs, ScoringEngine};
use super::syntax::SyntaxValidator;
use super::{keywords, quality, AttemptRecord, Evaluation, PromptSpec, RawExchange};
use crate::config::BenchConfig;

/// Error recorded for pairs skipped because the stop signal was raised.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Extraction -> syntax check -> (sandbox) -> quality/keywords -> score, for
/// one (model, prompt) pair at a time.
pub struct EvaluationPipeline {
    extractor: SnippetExtractor,
    validator: SyntaxValidator,
    sandbox: SandboxExecutor,
    scoring: ScoringEngine,
    max_concurrency: usize,
}

impl EvaluationPipeline {
    pub fn new(config: BenchConfig) -> Self {
        let config = config.normalized();
        Self {
            extractor: SnippetExtractor::new(config.language.clone(), config.block_selection),
            validator: SyntaxValidator::new(config.language.clone(), config.syntax_timeout),
            sandbox: SandboxExecutor::new(
                config.language,
                config.execution_timeout,
                config.work_dir,
            ),
            scoring: ScoringEngine::new(config.weights),
            max_concurrency: config.max_concurrency,
        }
    }

    pub fn scoring(&self) -> &ScoringEngine {
        &self.scoring
    }

    /// Denominator for every score this pipeline produces.
    pub fn score_scale(&self) -> f64 {
        self.scoring.max_score()
    }

    /// Judge one response text against one prompt.
    pub async fn evaluate_response(
        &self,
        prompt: &PromptSpec,
        response_text: &str,
        response_time_seconds: f64,
    ) -> Evaluation {
        let code = self.extractor.extract(response_text).text;

        let syntax = self.validator.validate(&code).await;
        let execution = if syntax.is_valid {
            Some(self.sandbox.execute(&code).await)
        } else {
            debug!(
                "Skipping execution for '{}': {}",
                prompt.name,
                syntax.error_message.as_deref().unwrap_or("invalid syntax")
            );
            None
        };

        let quality_metrics = quality::analyze(&code);
        let keyword_match = keywords::match_keywords(&code, &prompt.expected_keywords);

        let composite_score = self.scoring.score(&ScoreInputs {
            syntax: &syntax,
            execution: execution.as_ref(),
            quality: &quality_metrics,
            keywords: &keyword_match,
        });

        Evaluation {
            extracted_code: code,
            syntax,
            execution,
            quality_metrics,
            keyword_match,
            response_time_seconds,
            composite_score,
        }
    }

    /// Turn one exchange into exactly one attempt record.
    pub async fn evaluate_exchange(
        &self,
        prompt: &PromptSpec,
        exchange: &RawExchange,
    ) -> AttemptRecord {
        if !exchange.request_succeeded {
            let error = if exchange.response_text.trim().is_empty() {
                "request failed".to_string()
            } else {
                exchange.response_text.clone()
            };
            warn!(
                "Request failed for {} / {}: {}",
                exchange.model, prompt.name, error
            );
            return AttemptRecord::failed(
                &exchange.model,
                &prompt.name,
                exchange.response_time_seconds,
                error,
            );
        }

        let evaluation = self
            .evaluate_response(prompt, &exchange.response_text, exchange.response_time_seconds)
            .await;

        info!(
            "Scored {} / {}: {:.2}/{:.1} (syntax {}, runs {})",
            exchange.model,
            prompt.name,
            evaluation.composite_score,
            self.score_scale(),
            if evaluation.syntax.is_valid { "ok" } else { "invalid" },
            if evaluation.runs_without_error() { "ok" } else { "no" },
        );

        AttemptRecord::evaluated(&exchange.model, &prompt.name, evaluation)
    }

    /// Evaluate a whole batch. Returns one record per exchange, in input order.
    pub async fn run(
        &self,
        prompts: &[PromptSpec],
        exchanges: &[RawExchange],
        stop_rx: watch::Receiver<bool>,
    ) -> Vec<AttemptRecord> {
        self.run_with(prompts, exchanges, stop_rx, |_, _| {}).await
    }

    /// Like `run`, but hands each record to `on_record` (with its index) as
    /// soon as it is final, before later pairs finish.
    pub async fn run_with(
        &self,
        prompts: &[PromptSpec],
        exchanges: &[RawExchange],
        stop_rx: watch::Receiver<bool>,
        mut on_record: impl FnMut(usize, &AttemptRecord),
    ) -> Vec<AttemptRecord> {
        let lookup: HashMap<&str, &PromptSpec> =
            prompts.iter().map(|p| (p.name.as_str(), p)).collect();
        let lookup = &lookup;
        let total = exchanges.len();

        info!(
            "Evaluating {} exchanges against {} prompts (concurrency {})",
            total,
            prompts.len(),
            self.max_concurrency
        );

        let pairs = exchanges.iter().enumerate().map(|(i, exchange)| {
            let stop_rx = stop_rx.clone();
            async move {
                if *stop_rx.borrow() {
                    debug!("Stop requested, skipping pair {}/{}", i + 1, total);
                    return AttemptRecord::failed(
                        &exchange.model,
                        &exchange.prompt,
                        exchange.response_time_seconds,
                        CANCELLED_ERROR,
                    );
                }

                info!(
                    "Evaluating pair {}/{}: {} / {}",
                    i + 1,
                    total,
                    exchange.model,
                    exchange.prompt
                );

                match lookup.get(exchange.prompt.as_str()) {
                    Some(prompt) => self.evaluate_exchange(prompt, exchange).await,
                    None => {
                        warn!("Exchange references unknown prompt '{}'", exchange.prompt);
                        AttemptRecord::failed(
                            &exchange.model,
                            &exchange.prompt,
                            exchange.response_time_seconds,
                            format!("unknown prompt: {}", exchange.prompt),
                        )
                    }
                }
            }
        });

        // buffered(1) is the plain sequential loop.
        let mut results = pin!(stream::iter(pairs).buffered(self.max_concurrency));
        let mut records = Vec::with_capacity(total);
        while let Some(record) = results.next().await {
            on_record(records.len(), &record);
            records.push(record);
        }

        let cancelled = records
            .iter()
            .filter(|r| r.error.as_deref() == Some(CANCELLED_ERROR))
            .count();
        if cancelled > 0 {
            info!("Run stopped early: {} of {} pairs cancelled", cancelled, total);
        }

        records
    }
}

impl Default for EvaluationPipeline {
    fn default() -> Self {
        Self::new(BenchConfig::default())
    }
}
