use chrono::Utc;
use codegen_bench::evaluation::db::{ResultsDb, STATUS_COMPLETED, STATUS_RUNNING};
use codegen_bench::evaluation::engine::EvaluationPipeline;
use codegen_bench::evaluation::queries::{compare_models_in_run, compare_runs, run_report};
use codegen_bench::evaluation::{
    AttemptRecord, BenchRun, Evaluation, ExecutionResult, KeywordMatch, PromptSpec,
    QualityMetrics, RawExchange, ResultRow, SyntaxResult,
};
use std::collections::BTreeSet;
use tempfile::TempDir;
use tokio::sync::watch;

fn new_run(db: &ResultsDb, id: &str, started_at: &str) {
    db.insert_run(&BenchRun {
        id: id.to_string(),
        status: STATUS_RUNNING.to_string(),
        attempts_total: 0,
        attempts_completed: 0,
        score_scale: 12.0,
        error: None,
        started_at: started_at.to_string(),
        completed_at: None,
    })
    .unwrap();
}

fn scored(model: &str, prompt: &str, score: f64) -> AttemptRecord {
    let quality = QualityMetrics {
        line_count: 4,
        has_function_def: true,
        has_class_def: false,
        has_docstring: true,
        has_comments: false,
        has_error_handling: true,
        imports_used: 2,
    };
    AttemptRecord::evaluated(
        model,
        prompt,
        Evaluation {
            extracted_code: "def f():\n    pass".to_string(),
            syntax: SyntaxResult::valid(),
            execution: Some(ExecutionResult {
                ran_without_error: false,
                stdout_or_error_text: "Timeout - code ran too long".to_string(),
                timed_out: true,
            }),
            quality_metrics: quality,
            keyword_match: KeywordMatch {
                found_keywords: ["def".to_string(), "pass".to_string()].into_iter().collect(),
                expected_keywords: vec!["def".into(), "pass".into(), "yield".into()],
                match_ratio: 2.0 / 3.0,
                any_found: true,
            },
            response_time_seconds: 1.5,
            composite_score: score,
        },
    )
}

fn store(db: &ResultsDb, run_id: &str, attempts: &[AttemptRecord]) {
    for attempt in attempts {
        db.insert_result(&ResultRow::from_attempt(run_id, attempt))
            .unwrap();
    }
}

#[test]
fn test_results_round_trip() {
    let dir = TempDir::new().unwrap();
    let db = ResultsDb::open(&dir.path().join("bench.db")).unwrap();
    new_run(&db, "run-1", &Utc::now().to_rfc3339());

    let ok = scored("m", "Adder", 7.5);
    let failed = AttemptRecord::failed("m", "Sorter", 2.0, "Error: HTTP 500");
    store(&db, "run-1", &[ok.clone(), failed]);

    let rows = db.get_results_for_run("run-1").unwrap();
    assert_eq!(rows.len(), 2);

    let expected = ResultRow::from_attempt("run-1", &ok);
    assert_eq!(rows[0].id, 1);
    assert_eq!(rows[0].quality_metrics, expected.quality_metrics);
    assert_eq!(rows[0].found_keywords, vec!["def".to_string(), "pass".to_string()]);
    assert_eq!(rows[0].composite_score, Some(7.5));
    assert!(rows[0].timed_out);
    assert_eq!(
        rows[0].execution_output.as_deref(),
        Some("Timeout - code ran too long")
    );
    assert!((rows[0].keyword_match_ratio.unwrap() - 2.0 / 3.0).abs() < 1e-12);

    assert!(!rows[1].success);
    assert!(rows[1].quality_metrics.is_none());
    assert!(rows[1].composite_score.is_none());
    assert_eq!(rows[1].error.as_deref(), Some("Error: HTTP 500"));
}

#[test]
fn test_run_lifecycle() {
    let db = ResultsDb::open_in_memory().unwrap();
    new_run(&db, "run-1", "2026-01-01T00:00:00+00:00");
    new_run(&db, "run-2", "2026-02-01T00:00:00+00:00");

    db.update_run_progress("run-1", 3).unwrap();
    db.complete_run("run-1", STATUS_COMPLETED, None).unwrap();

    let run = db.get_run("run-1").unwrap().unwrap();
    assert_eq!(run.status, STATUS_COMPLETED);
    assert_eq!(run.attempts_completed, 3);
    assert!(run.completed_at.is_some());
    assert_eq!(run.score_scale, 12.0);

    assert!(db.get_run("missing").unwrap().is_none());
    assert!(db.complete_run("missing", STATUS_COMPLETED, None).is_err());

    let runs = db.list_runs().unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["run-2", "run-1"]);
}

#[tokio::test]
async fn test_progress_visible_while_batch_runs() {
    let db = ResultsDb::open_in_memory().unwrap();
    new_run(&db, "live", &Utc::now().to_rfc3339());

    let prompt = PromptSpec::new("Adder", "Write add()", vec![], "").unwrap();
    let exchanges: Vec<RawExchange> = ["a", "b", "c"]
        .iter()
        .map(|m| RawExchange::new(*m, "Adder", "Error: HTTP 503", 0.5, false).unwrap())
        .collect();
    let (_tx, rx) = watch::channel(false);

    let mut observed = Vec::new();
    let pipeline = EvaluationPipeline::default();
    let records = pipeline
        .run_with(&[prompt], &exchanges, rx, |i, record| {
            let row = ResultRow::from_attempt("live", record);
            db.record_attempt("live", (i + 1) as i64, &row).unwrap();

            let run = db.get_run("live").unwrap().unwrap();
            let stored = db.get_results_for_run("live").unwrap().len();
            observed.push((run.status, run.attempts_completed, stored));
        })
        .await;

    assert_eq!(records.len(), 3);
    assert_eq!(
        observed,
        vec![
            (STATUS_RUNNING.to_string(), 1, 1),
            (STATUS_RUNNING.to_string(), 2, 2),
            (STATUS_RUNNING.to_string(), 3, 3),
        ]
    );
}

#[test]
fn test_report_recomputed_from_rows() {
    let db = ResultsDb::open_in_memory().unwrap();
    new_run(&db, "run-1", &Utc::now().to_rfc3339());
    store(
        &db,
        "run-1",
        &[
            scored("a", "p1", 2.0),
            scored("a", "p2", 4.0),
            scored("a", "p3", 6.0),
            AttemptRecord::failed("a", "p4", 1.0, "boom"),
            scored("b", "p1", 9.0),
        ],
    );

    let report = run_report(&db, "run-1").unwrap();
    assert_eq!(report.score_scale, 12.0);
    assert_eq!(report.models["a"].average_score, 4.0);
    assert_eq!(report.models["a"].success_rate, 75.0);
    assert_eq!(report.ranking[0].model_name, "b");

    assert!(run_report(&db, "nope").is_err());
}

#[test]
fn test_compare_runs_flags_changes() {
    let db = ResultsDb::open_in_memory().unwrap();
    new_run(&db, "base", "2026-01-01T00:00:00+00:00");
    new_run(&db, "curr", "2026-01-02T00:00:00+00:00");

    store(
        &db,
        "base",
        &[scored("steady", "p", 5.0), scored("worse", "p", 8.0), scored("better", "p", 2.0)],
    );
    store(
        &db,
        "curr",
        &[
            scored("steady", "p", 5.5),
            scored("worse", "p", 6.0),
            scored("better", "p", 4.0),
            scored("new", "p", 3.0),
        ],
    );

    let report = compare_runs(&db, "curr", "base").unwrap();
    assert_eq!(report.per_model.len(), 4);
    assert_eq!(report.regressions, 1);
    assert_eq!(report.improvements, 1);
    assert_eq!(report.unchanged, 2);

    let worse = report.per_model.iter().find(|m| m.model_name == "worse").unwrap();
    assert!(worse.regression);
    assert_eq!(worse.delta, Some(-2.0));

    let new = report.per_model.iter().find(|m| m.model_name == "new").unwrap();
    assert!(new.baseline_score.is_none());
    assert!(new.delta.is_none());

    // (0.5 - 2.0 + 2.0) / 3
    assert!((report.avg_score_delta.unwrap() - 0.5 / 3.0).abs() < 1e-12);
}

#[test]
fn test_compare_models_within_run() {
    let db = ResultsDb::open_in_memory().unwrap();
    new_run(&db, "run-1", &Utc::now().to_rfc3339());
    store(&db, "run-1", &[scored("a", "p", 3.0), scored("b", "p", 8.0)]);

    let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let report = compare_models_in_run(&db, "run-1", &names).unwrap();
    assert_eq!(report.models.len(), 2);
    assert_eq!(report.missing_models, vec!["c".to_string()]);
    assert!(report.models[1].best_average_score);
    assert!(!report.models[0].best_average_score);

    let found: BTreeSet<&str> = report
        .models
        .iter()
        .map(|m| m.aggregate.model_name.as_str())
        .collect();
    assert!(found.contains("a") && found.contains("b"));
}
