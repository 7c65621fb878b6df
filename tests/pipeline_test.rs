use codegen_bench::config::{BenchConfig, LanguageProfile};
use codegen_bench::evaluation::engine::EvaluationPipeline;
use codegen_bench::evaluation::sandbox::{SandboxExecutor, TIMEOUT_MESSAGE};
use codegen_bench::evaluation::{PromptSpec, RawExchange};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::watch;

fn python_available() -> bool {
    std::process::Command::new(LanguageProfile::default().interpreter)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
    };
}

fn adder_prompt() -> PromptSpec {
    PromptSpec::new(
        "Adder",
        "Write a Python function add(a, b) that returns the sum.",
        vec!["def".into(), "add".into(), "return".into()],
        "function_definition",
    )
    .unwrap()
}

fn pipeline_in(dir: &TempDir, execution_timeout: Duration) -> EvaluationPipeline {
    EvaluationPipeline::new(BenchConfig {
        execution_timeout,
        work_dir: Some(dir.path().to_path_buf()),
        ..BenchConfig::default()
    })
}

fn fenced(code: &str) -> String {
    format!("Sure, here you go:\n```python\n{}\n```\nHope this helps.", code)
}

#[tokio::test]
async fn test_valid_snippet_round_trip() {
    require_python!();
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_in(&dir, Duration::from_secs(10));

    let eval = pipeline
        .evaluate_response(&adder_prompt(), &fenced("def add(a, b):\n    return a + b"), 1.25)
        .await;

    assert_eq!(eval.extracted_code, "def add(a, b):\n    return a + b");
    assert!(eval.syntax.is_valid, "{:?}", eval.syntax.error_message);
    let execution = eval.execution.as_ref().unwrap();
    assert!(execution.ran_without_error);
    assert!(!execution.timed_out);
    assert_eq!(execution.stdout_or_error_text, "");
    assert_eq!(eval.keyword_match.match_ratio, 1.0);
    // syntax 3.0 + runs 2.5 + keywords 2.0 + function 1.5 + length 0.5
    assert_eq!(eval.composite_score, 9.5);
    assert_eq!(eval.response_time_seconds, 1.25);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_infinite_loop_times_out_and_cleans_up() {
    require_python!();
    let dir = TempDir::new().unwrap();
    let limit = Duration::from_secs(1);
    let sandbox = SandboxExecutor::new(
        LanguageProfile::default(),
        limit,
        Some(dir.path().to_path_buf()),
    );

    let started = Instant::now();
    let result = sandbox.execute("while True:\n    pass").await;
    let elapsed = started.elapsed();

    assert!(!result.ran_without_error);
    assert!(result.timed_out);
    assert_eq!(result.stdout_or_error_text, TIMEOUT_MESSAGE);
    assert!(elapsed < limit + Duration::from_secs(3), "took {:?}", elapsed);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_invalid_syntax_skips_execution() {
    require_python!();
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_in(&dir, Duration::from_secs(10));

    let eval = pipeline
        .evaluate_response(&adder_prompt(), &fenced("def add(a, b)\n    return a + b"), 0.5)
        .await;

    assert!(!eval.syntax.is_valid);
    assert!(eval.execution.is_none());
    assert!(!eval.runs_without_error());
    // Static signals still count: keywords, function def, length.
    assert!(eval.quality_metrics.has_function_def);
    assert_eq!(eval.composite_score, 2.0 + 1.5 + 0.5);
}

#[tokio::test]
async fn test_runtime_error_reports_stderr() {
    require_python!();
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_in(&dir, Duration::from_secs(10));

    let eval = pipeline
        .evaluate_response(&adder_prompt(), &fenced("raise ValueError('boom')"), 0.1)
        .await;

    let execution = eval.execution.unwrap();
    assert!(!execution.ran_without_error);
    assert!(!execution.timed_out);
    assert!(
        execution.stdout_or_error_text.contains("ValueError: boom"),
        "{}",
        execution.stdout_or_error_text
    );
}

#[tokio::test]
async fn test_rescore_reproduces_composite() {
    require_python!();
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline_in(&dir, Duration::from_secs(10));
    let code = "import math\n\ndef area(r):\n    \"\"\"Circle area.\"\"\"\n    # pi r^2\n    return math.pi * r * r\n\nprint(area(2))";

    let eval = pipeline
        .evaluate_response(&adder_prompt(), &fenced(code), 2.0)
        .await;

    assert!(eval.execution.as_ref().unwrap().ran_without_error);
    assert!(eval.execution.as_ref().unwrap().stdout_or_error_text.starts_with("12.56"));
    assert_eq!(pipeline.scoring().rescore(&eval), eval.composite_score);
    assert_eq!(pipeline.scoring().rescore(&eval), pipeline.scoring().rescore(&eval));
}

#[tokio::test]
async fn test_batch_keeps_order_and_count_with_workers() {
    require_python!();
    let dir = TempDir::new().unwrap();
    let pipeline = EvaluationPipeline::new(BenchConfig {
        max_concurrency: 3,
        work_dir: Some(dir.path().to_path_buf()),
        ..BenchConfig::default()
    });

    let prompts = vec![adder_prompt()];
    let exchanges = vec![
        RawExchange::new("m1", "Adder", fenced("def add(a, b):\n    return a + b"), 1.0, true)
            .unwrap(),
        RawExchange::new("m2", "Adder", "Error: connection refused", 30.0, false).unwrap(),
        RawExchange::new("m3", "Adder", fenced("print('hi')"), 2.0, true).unwrap(),
        RawExchange::new("m4", "Nope", "x = 1", 2.0, true).unwrap(),
    ];

    let (_stop_tx, stop_rx) = watch::channel(false);
    let records = pipeline.run(&prompts, &exchanges, stop_rx).await;

    assert_eq!(records.len(), exchanges.len());
    let models: Vec<&str> = records.iter().map(|r| r.model_name.as_str()).collect();
    assert_eq!(models, vec!["m1", "m2", "m3", "m4"]);

    assert!(records[0].success);
    assert!(!records[1].success);
    assert_eq!(records[1].error.as_deref(), Some("Error: connection refused"));
    assert!(records[2].success);
    assert_eq!(
        records[2]
            .evaluation
            .as_ref()
            .unwrap()
            .execution
            .as_ref()
            .unwrap()
            .stdout_or_error_text,
        "hi\n"
    );
    assert_eq!(records[3].error.as_deref(), Some("unknown prompt: Nope"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_failed_exchange_needs_no_interpreter() {
    let bogus = LanguageProfile {
        interpreter: "no-such-interpreter-9c1e".to_string(),
        ..LanguageProfile::default()
    };
    let pipeline = EvaluationPipeline::new(BenchConfig {
        language: bogus,
        ..BenchConfig::default()
    });
    let exchange = RawExchange::new("m", "Adder", "Error: HTTP 500", 3.0, false).unwrap();

    let record = pipeline.evaluate_exchange(&adder_prompt(), &exchange).await;
    assert!(!record.success);
    assert!(record.evaluation.is_none());
    assert!(record.composite_score().is_none());
}

#[tokio::test]
async fn test_missing_interpreter_scores_static_signals_only() {
    let bogus = LanguageProfile {
        interpreter: "no-such-interpreter-9c1e".to_string(),
        ..LanguageProfile::default()
    };
    let pipeline = EvaluationPipeline::new(BenchConfig {
        language: bogus,
        ..BenchConfig::default()
    });

    let eval = pipeline
        .evaluate_response(&adder_prompt(), &fenced("def add(a, b):\n    return a + b"), 1.0)
        .await;

    assert!(!eval.syntax.is_valid);
    assert!(eval.execution.is_none());
    assert_eq!(eval.composite_score, 2.0 + 1.5 + 0.5);
}
