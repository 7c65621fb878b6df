use codegen_bench::evaluation::aggregate::{aggregate_models, build_report, rank, summarize};
use codegen_bench::evaluation::scoring::WeightTable;
use codegen_bench::evaluation::{
    AttemptRecord, Evaluation, ExecutionResult, KeywordMatch, ModelAggregate, QualityMetrics,
    SyntaxResult,
};
use std::collections::BTreeSet;

fn scored(model: &str, prompt: &str, score: f64, time: f64) -> AttemptRecord {
    let evaluation = Evaluation {
        extracted_code: "x = 1".to_string(),
        syntax: SyntaxResult::valid(),
        execution: Some(ExecutionResult {
            ran_without_error: true,
            stdout_or_error_text: String::new(),
            timed_out: false,
        }),
        quality_metrics: QualityMetrics::default(),
        keyword_match: KeywordMatch {
            found_keywords: BTreeSet::new(),
            expected_keywords: vec![],
            match_ratio: 1.0,
            any_found: true,
        },
        response_time_seconds: time,
        composite_score: score,
    };
    AttemptRecord::evaluated(model, prompt, evaluation)
}

fn aggregate(name: &str, score: f64, rate: f64) -> ModelAggregate {
    ModelAggregate {
        model_name: name.to_string(),
        total_attempts: 5,
        successful_attempts: 5,
        success_rate: rate,
        average_score: score,
        average_response_time_seconds: 1.0,
    }
}

#[test]
fn test_average_over_successful_attempts() {
    let mut records = vec![
        scored("M", "p1", 2.0, 1.0),
        scored("M", "p2", 4.0, 2.0),
        scored("M", "p3", 6.0, 3.0),
    ];
    let models = aggregate_models(&records);
    assert_eq!(models["M"].average_score, 4.0);
    assert_eq!(models["M"].success_rate, 100.0);

    records.push(AttemptRecord::failed("M", "p4", 30.0, "Error: timeout"));
    let models = aggregate_models(&records);
    let m = &models["M"];
    assert_eq!(m.total_attempts, 4);
    assert_eq!(m.successful_attempts, 3);
    assert_eq!(m.success_rate, 75.0);
    assert_eq!(m.average_score, 4.0);
    // Failed attempts do not drag in their response time.
    assert_eq!(m.average_response_time_seconds, 2.0);
}

#[test]
fn test_zero_success_model_is_zero_valued() {
    let records = vec![
        AttemptRecord::failed("down", "p1", 1.0, "Error: HTTP 502"),
        AttemptRecord::failed("down", "p2", 1.0, "Error: HTTP 502"),
    ];
    let models = aggregate_models(&records);
    let m = &models["down"];
    assert_eq!(m.total_attempts, 2);
    assert_eq!(m.successful_attempts, 0);
    assert_eq!(m.success_rate, 0.0);
    assert_eq!(m.average_score, 0.0);
    assert_eq!(m.average_response_time_seconds, 0.0);
}

#[test]
fn test_empty_input() {
    let records: Vec<AttemptRecord> = vec![];
    let report = build_report(&records, 12.0);
    assert!(report.models.is_empty());
    assert!(report.ranking.is_empty());
    assert_eq!(report.summary.total_attempts, 0);
    assert_eq!(report.summary.success_rate, 0.0);
}

#[test]
fn test_tie_broken_by_success_rate() {
    let a = aggregate("A", 5.0, 100.0);
    let b = aggregate("B", 5.0, 80.0);
    let ranking = rank([&b, &a]);
    assert_eq!(ranking[0].model_name, "A");
    assert_eq!(ranking[0].position, 1);
    assert_eq!(ranking[1].model_name, "B");
    assert_eq!(ranking[1].position, 2);
}

#[test]
fn test_ranking_independent_of_input_order() {
    let forward = vec![
        scored("alpha", "p", 3.0, 1.0),
        scored("beta", "p", 7.0, 1.0),
        scored("gamma", "p", 3.0, 1.0),
        AttemptRecord::failed("delta", "p", 1.0, "boom"),
    ];
    let mut backward = forward.clone();
    backward.reverse();

    let a = build_report(&forward, 12.0);
    let b = build_report(&backward, 12.0);
    assert_eq!(a.ranking, b.ranking);

    let order: Vec<&str> = a.ranking.iter().map(|r| r.model_name.as_str()).collect();
    assert_eq!(order, vec!["beta", "alpha", "gamma", "delta"]);
}

#[test]
fn test_summary_counts_models_and_successes() {
    let records = vec![
        scored("a", "p1", 1.0, 2.0),
        scored("b", "p1", 1.0, 4.0),
        AttemptRecord::failed("b", "p2", 9.0, "boom"),
    ];
    let summary = summarize(&records);
    assert_eq!(summary.models_tested, 2);
    assert_eq!(summary.total_attempts, 3);
    assert_eq!(summary.successful_attempts, 2);
    assert!((summary.success_rate - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.average_response_time_seconds, 3.0);
}

#[test]
fn test_report_declares_score_scale() {
    let records = vec![scored("a", "p", 6.0, 1.0)];
    let scale = WeightTable::default().max_score();
    let report = build_report(&records, scale);
    assert_eq!(report.score_scale, 12.0);
    assert_eq!(report.ranking[0].average_score, 6.0);
}
