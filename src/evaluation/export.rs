use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

use super::{PromptSpec, ResultRow};
use crate::error::BenchError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub timestamp: String,
    pub run_id: String,
    pub score_scale: f64,
    pub total_attempts: usize,
    pub successful_attempts: usize,
    pub models_tested: Vec<String>,
    pub prompts_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub prompt_text: String,
    pub expected_behavior: String,
    pub expected_keywords: Vec<String>,
}

/// Self-contained JSON document for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExport {
    pub metadata: ExportMetadata,
    pub prompts_info: BTreeMap<String, PromptInfo>,
    pub results: Vec<ResultRow>,
}

pub fn build_export(
    run_id: &str,
    score_scale: f64,
    prompts: &[PromptSpec],
    results: Vec<ResultRow>,
) -> RunExport {
    let models_tested: BTreeSet<&str> = results.iter().map(|r| r.model_name.as_str()).collect();
    let prompts_used: BTreeSet<&str> = results.iter().map(|r| r.prompt_name.as_str()).collect();

    // Only prompts that actually appear in the results.
    let prompts_info: BTreeMap<String, PromptInfo> = prompts
        .iter()
        .filter(|p| prompts_used.contains(p.name.as_str()))
        .map(|p| {
            (
                p.name.clone(),
                PromptInfo {
                    prompt_text: p.prompt.clone(),
                    expected_behavior: p.expected_behavior.clone(),
                    expected_keywords: p.expected_keywords.clone(),
                },
            )
        })
        .collect();

    let metadata = ExportMetadata {
        timestamp: Utc::now().to_rfc3339(),
        run_id: run_id.to_string(),
        score_scale,
        total_attempts: results.len(),
        successful_attempts: results.iter().filter(|r| r.success).count(),
        models_tested: models_tested.into_iter().map(String::from).collect(),
        prompts_used: prompts_used.into_iter().map(String::from).collect(),
    };

    RunExport {
        metadata,
        prompts_info,
        results,
    }
}

pub fn write_export(path: &Path, export: &RunExport) -> Result<(), BenchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(export)?;
    std::fs::write(path, json)?;
    info!(
        "Wrote {} results for run {} to {:?}",
        export.results.len(),
        export.metadata.run_id,
        path
    );
    Ok(())
}

/// One line of the flat per-attempt summary. Failed attempts carry `false`
/// and zero in every evaluation column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvSummaryRow {
    pub model_name: String,
    pub prompt: String,
    pub success: bool,
    pub response_time: f64,
    pub syntax_valid: bool,
    pub runs_without_error: bool,
    pub contains_keywords: bool,
    pub has_function_def: bool,
    pub has_error_handling: bool,
    pub has_docstring: bool,
    pub line_count: usize,
    pub overall_score: f64,
}

impl CsvSummaryRow {
    pub fn from_row(row: &ResultRow) -> Self {
        let mut summary = CsvSummaryRow {
            model_name: row.model_name.clone(),
            prompt: row.prompt_name.clone(),
            success: row.success,
            response_time: row.response_time_seconds,
            syntax_valid: false,
            runs_without_error: false,
            contains_keywords: false,
            has_function_def: false,
            has_error_handling: false,
            has_docstring: false,
            line_count: 0,
            overall_score: 0.0,
        };
        if !row.success {
            return summary;
        }

        summary.syntax_valid = row.syntax_valid;
        summary.runs_without_error = row.runs_without_error;
        summary.contains_keywords = row.keyword_match_ratio.is_some_and(|r| r > 0.0);
        if let Some(q) = &row.quality_metrics {
            summary.has_function_def = q.has_function_def;
            summary.has_error_handling = q.has_error_handling;
            summary.has_docstring = q.has_docstring;
            summary.line_count = q.line_count;
        }
        summary.overall_score = row.composite_score.unwrap_or(0.0);
        summary
    }
}

/// Flat CSV summary, one line per attempt in input order.
pub fn write_csv_export(path: &Path, rows: &[ResultRow]) -> Result<(), BenchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(CsvSummaryRow::from_row(row))?;
    }
    wtr.flush()?;
    info!("Wrote CSV summary of {} attempts to {:?}", rows.len(), path);
    Ok(())
}
