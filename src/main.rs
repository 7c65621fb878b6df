use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use codegen_bench::config::{BenchConfig, CliArgs, Command};
use codegen_bench::evaluation::aggregate::build_report;
use codegen_bench::evaluation::db::{
    ResultsDb, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_FAILED, STATUS_RUNNING,
};
use codegen_bench::evaluation::engine::EvaluationPipeline;
use codegen_bench::evaluation::export::{build_export, write_csv_export, write_export};
use codegen_bench::evaluation::queries;
use codegen_bench::evaluation::{
    AggregateReport, AttemptRecord, BatchInput, BenchRun, ComparisonReport, ResultRow,
    RunCompareReport,
};
use codegen_bench::settings::load_settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_tracing(args.verbose, args.log_file.as_deref())?;

    info!("Starting codegen-bench v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Evaluate {
            input,
            settings,
            output,
            csv,
            concurrency,
            execution_timeout,
            interpreter,
            no_db,
        } => {
            let mut config = BenchConfig::from_settings(load_settings(&settings));
            if let Some(n) = concurrency {
                config.max_concurrency = n;
            }
            if let Some(secs) = execution_timeout {
                config = config.with_execution_timeout(secs);
            }
            if let Some(interpreter) = interpreter {
                config.language.interpreter = interpreter;
            }

            let db = if no_db {
                None
            } else {
                Some(ResultsDb::open(&args.db)?)
            };
            evaluate(
                config.normalized(),
                &input,
                output.as_deref(),
                csv.as_deref(),
                db.as_ref(),
            )
            .await
        }
        Command::Runs => {
            let db = ResultsDb::open(&args.db)?;
            print_runs(&db.list_runs()?);
            Ok(())
        }
        Command::Report { run_id } => {
            let db = ResultsDb::open(&args.db)?;
            let report = queries::run_report(&db, &run_id)?;
            println!("Run {}", run_id);
            print_report(&report);
            Ok(())
        }
        Command::CompareRuns { current, baseline } => {
            let db = ResultsDb::open(&args.db)?;
            print_run_comparison(&queries::compare_runs(&db, &current, &baseline)?);
            Ok(())
        }
        Command::CompareModels { run_id, models } => {
            let db = ResultsDb::open(&args.db)?;
            print_model_comparison(&queries::compare_models_in_run(&db, &run_id, &models)?);
            Ok(())
        }
    }
}

fn init_tracing(
    verbose: bool,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = if verbose {
        "codegen_bench=debug"
    } else {
        "codegen_bench=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log file path has no file name: {:?}", path))?;
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn evaluate(
    config: BenchConfig,
    input: &Path,
    output: Option<&Path>,
    csv: Option<&Path>,
    db: Option<&ResultsDb>,
) -> anyhow::Result<()> {
    let batch = BatchInput::load(input)?;
    info!(
        "Loaded {} prompts and {} exchanges from {:?}",
        batch.prompts.len(),
        batch.exchanges.len(),
        input
    );
    if batch.exchanges.is_empty() {
        warn!("Batch has no exchanges, nothing to evaluate");
    }

    let pipeline = EvaluationPipeline::new(config);
    let score_scale = pipeline.score_scale();
    let run_id = uuid::Uuid::new_v4().to_string();

    if let Some(db) = db {
        db.insert_run(&BenchRun {
            id: run_id.clone(),
            status: STATUS_RUNNING.to_string(),
            attempts_total: batch.exchanges.len() as i64,
            attempts_completed: 0,
            score_scale,
            error: None,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
        })?;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let ctrl_c_tx = Arc::clone(&stop_tx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing the current pair and stopping");
            let _ = ctrl_c_tx.send(true);
        }
    });

    // Each record is stored as soon as it is final; a storage failure stops
    // the remaining pairs.
    let mut store_error: Option<anyhow::Error> = None;
    let records = pipeline
        .run_with(&batch.prompts, &batch.exchanges, stop_rx.clone(), |i, record| {
            let Some(db) = db else { return };
            if store_error.is_some() {
                return;
            }
            let row = ResultRow::from_attempt(&run_id, record);
            if let Err(e) = db.record_attempt(&run_id, (i + 1) as i64, &row) {
                error!(
                    "Failed to store result {}/{}: {}",
                    row.model_name, row.prompt_name, e
                );
                let _ = stop_tx.send(true);
                store_error = Some(e);
            }
        })
        .await;
    let cancelled = *stop_rx.borrow();

    if let Some(db) = db {
        finish_run(db, &run_id, records.len(), cancelled, store_error)?;
    }

    let rows: Vec<ResultRow> = records
        .iter()
        .map(|r| ResultRow::from_attempt(&run_id, r))
        .collect();

    if let Some(path) = csv {
        write_csv_export(path, &rows)?;
    }
    if let Some(path) = output {
        let export = build_export(&run_id, score_scale, &batch.prompts, rows);
        write_export(path, &export)?;
    }

    println!("Run {}", run_id);
    print_report(&build_report::<AttemptRecord>(&records, score_scale));
    Ok(())
}

fn finish_run(
    db: &ResultsDb,
    run_id: &str,
    stored: usize,
    cancelled: bool,
    store_error: Option<anyhow::Error>,
) -> anyhow::Result<()> {
    if let Some(e) = store_error {
        let message = e.to_string();
        db.complete_run(run_id, STATUS_FAILED, Some(&message))?;
        return Err(e);
    }

    let status = if cancelled {
        STATUS_CANCELLED
    } else {
        STATUS_COMPLETED
    };
    db.complete_run(run_id, status, None)?;
    info!("Stored {} results for run {} ({})", stored, run_id, status);
    Ok(())
}

fn print_report(report: &AggregateReport) {
    let s = &report.summary;
    println!(
        "{} models, {} attempts, {} successful ({:.1}%), avg response {:.2}s",
        s.models_tested,
        s.total_attempts,
        s.successful_attempts,
        s.success_rate,
        s.average_response_time_seconds
    );
    println!();
    println!(
        "{:>3}  {:<32} {:>14} {:>9} {:>10}",
        "#", "model", "score", "success", "avg time"
    );
    for entry in &report.ranking {
        println!(
            "{:>3}  {:<32} {:>6.2} / {:<5.1} {:>8.1}% {:>9.2}s",
            entry.position,
            entry.model_name,
            entry.average_score,
            report.score_scale,
            entry.success_rate,
            entry.average_response_time_seconds
        );
    }
}

fn print_runs(runs: &[BenchRun]) {
    if runs.is_empty() {
        println!("No runs stored");
        return;
    }
    for run in runs {
        println!(
            "{}  {:<10} {}/{} attempts  started {}{}",
            run.id,
            run.status,
            run.attempts_completed,
            run.attempts_total,
            run.started_at,
            run.error
                .as_deref()
                .map(|e| format!("  error: {}", e))
                .unwrap_or_default()
        );
    }
}

fn print_run_comparison(report: &RunCompareReport) {
    println!(
        "Current {} vs baseline {}",
        report.current_run_id, report.baseline_run_id
    );
    let fmt = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "-".into());
    for m in &report.per_model {
        let flag = if m.regression {
            "REGRESSION"
        } else if m.improvement {
            "improved"
        } else {
            ""
        };
        println!(
            "  {:<32} {:>8} -> {:<8} {:>8} {}",
            m.model_name,
            fmt(m.baseline_score),
            fmt(m.current_score),
            m.delta.map(|d| format!("{:+.2}", d)).unwrap_or_else(|| "-".into()),
            flag
        );
    }
    println!(
        "Average delta {}, {} regressions, {} improvements, {} unchanged",
        report
            .avg_score_delta
            .map(|d| format!("{:+.2}", d))
            .unwrap_or_else(|| "-".into()),
        report.regressions,
        report.improvements,
        report.unchanged
    );
}

fn print_model_comparison(report: &ComparisonReport) {
    let mark = |best: bool| if best { "*" } else { " " };
    for m in &report.models {
        let a = &m.aggregate;
        println!(
            "  {:<32} score {:>6.2}/{:.1}{}  success {:>5.1}%{}  avg time {:>6.2}s{}",
            a.model_name,
            a.average_score,
            report.score_scale,
            mark(m.best_average_score),
            a.success_rate,
            mark(m.best_success_rate),
            a.average_response_time_seconds,
            mark(m.best_response_time)
        );
    }
    for name in &report.missing_models {
        println!("  {:<32} no attempts in this run", name);
    }
}
