use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::evaluation::extract::BlockSelection;
use crate::evaluation::scoring::WeightTable;
use crate::settings::BenchSettings;

/// codegen-bench: scores model-generated code and ranks the models.
#[derive(Parser, Debug, Clone)]
#[command(name = "codegen-bench", version)]
pub struct CliArgs {
    /// SQLite database holding runs and per-attempt results
    #[arg(long = "db", global = true, default_value = DEFAULT_DB_FILE)]
    pub db: PathBuf,

    /// Also write logs to this file
    #[arg(short = 'l', long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Evaluate a batch of already-fetched model responses
    Evaluate {
        /// Batch file: {"prompts": [...], "exchanges": [...]}
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Settings file (weights, timeouts, interpreter)
        #[arg(short = 's', long = "settings", default_value = DEFAULT_SETTINGS_FILE)]
        settings: PathBuf,

        /// Write a JSON export of the run here
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Write a per-attempt CSV summary here
        #[arg(long = "csv")]
        csv: Option<PathBuf>,

        /// Number of (model, prompt) pairs evaluated at once
        #[arg(long = "concurrency")]
        concurrency: Option<usize>,

        /// Sandbox wall-clock limit per snippet, in seconds
        #[arg(long = "execution-timeout")]
        execution_timeout: Option<f64>,

        /// Interpreter used for syntax checks and execution
        #[arg(long = "interpreter")]
        interpreter: Option<String>,

        /// Skip writing the run to the database
        #[arg(long = "no-db")]
        no_db: bool,
    },

    /// List stored runs, most recent first
    Runs,

    /// Print aggregates and ranking for a stored run
    Report { run_id: String },

    /// Compare per-model average scores of two stored runs
    CompareRuns { current: String, baseline: String },

    /// Compare a subset of models within one stored run
    CompareModels {
        run_id: String,
        #[arg(required = true)]
        models: Vec<String>,
    },
}

// File defaults
pub const DEFAULT_DB_FILE: &str = "codegen-bench.db";
pub const DEFAULT_SETTINGS_FILE: &str = "codegen-bench.json";

// Interpreter
pub const DEFAULT_INTERPRETER: &str = "python3";
pub const INTERPRETER_ENV_VAR: &str = "CODEGEN_BENCH_PYTHON";

// Timeouts
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SYNTAX_TIMEOUT_SECS: u64 = 5;
/// Grace period for draining pipes after the child has exited.
pub const OUTPUT_DRAIN_TIMEOUT_MS: u64 = 500;

// Concurrency
pub const DEFAULT_MAX_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY_LIMIT: usize = 32;

/// How the language under test is recognised, parsed and run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub name: String,
    /// Lower-case tags accepted on an opening fence.
    pub fence_tags: Vec<String>,
    pub file_extension: String,
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
}

impl LanguageProfile {
    pub fn python() -> Self {
        let interpreter = std::env::var(INTERPRETER_ENV_VAR)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string());

        LanguageProfile {
            name: "python".to_string(),
            fence_tags: vec!["python".into(), "py".into(), "python3".into()],
            file_extension: "py".to_string(),
            interpreter,
            // Isolated mode: no user site-packages, no PYTHON* env vars.
            interpreter_args: vec!["-I".to_string()],
        }
    }

    pub fn matches_tag(&self, tag: &str) -> bool {
        let tag = tag.trim().to_ascii_lowercase();
        !tag.is_empty() && self.fence_tags.iter().any(|t| *t == tag)
    }
}

impl Default for LanguageProfile {
    fn default() -> Self {
        Self::python()
    }
}

/// Immutable engine configuration, handed to each component at construction.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub language: LanguageProfile,
    pub weights: WeightTable,
    pub execution_timeout: Duration,
    pub syntax_timeout: Duration,
    /// Base directory for execution workspaces; system temp dir when unset.
    pub work_dir: Option<PathBuf>,
    pub max_concurrency: usize,
    pub block_selection: BlockSelection,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            language: LanguageProfile::default(),
            weights: WeightTable::default(),
            execution_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            syntax_timeout: Duration::from_secs(DEFAULT_SYNTAX_TIMEOUT_SECS),
            work_dir: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            block_selection: BlockSelection::default(),
        }
    }
}

impl BenchConfig {
    /// Build a config from a settings file; absent fields keep their defaults.
    pub fn from_settings(settings: BenchSettings) -> Self {
        let mut config = BenchConfig::default();

        if let Some(weights) = settings.evaluation_weights {
            config.weights = weights;
        }
        if let Some(timeouts) = settings.timeouts {
            if let Some(limit) = timeouts
                .execution_timeout
                .and_then(|s| seconds("execution_timeout", s))
            {
                config.execution_timeout = limit;
            }
            if let Some(limit) = timeouts
                .syntax_timeout
                .and_then(|s| seconds("syntax_timeout", s))
            {
                config.syntax_timeout = limit;
            }
        }
        if let Some(interpreter) = settings.interpreter {
            config.language.interpreter = interpreter;
        }
        if let Some(n) = settings.max_concurrency {
            config.max_concurrency = n;
        }
        if let Some(selection) = settings.block_selection {
            config.block_selection = selection;
        }
        config.work_dir = settings.work_dir;

        config.normalized()
    }

    /// Override the sandbox limit; invalid values keep the current one.
    pub fn with_execution_timeout(mut self, secs: f64) -> Self {
        if let Some(limit) = seconds("execution_timeout", secs) {
            self.execution_timeout = limit;
        }
        self
    }

    /// Clamp values that would otherwise stall or flood the sandbox.
    pub fn normalized(mut self) -> Self {
        self.max_concurrency = self.max_concurrency.clamp(1, MAX_CONCURRENCY_LIMIT);
        if self.execution_timeout.is_zero() {
            self.execution_timeout = Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS);
        }
        if self.syntax_timeout.is_zero() {
            self.syntax_timeout = Duration::from_secs(DEFAULT_SYNTAX_TIMEOUT_SECS);
        }
        self
    }
}

/// Seconds from a settings value. Negative, NaN and infinite values are
/// ignored with a warning rather than failing the whole file.
pub fn seconds(field: &str, secs: f64) -> Option<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(limit) => Some(limit),
        Err(e) => {
            warn!("Ignoring {} = {}: {}", field, secs, e);
            None
        }
    }
}
