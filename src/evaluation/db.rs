use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{BenchRun, QualityMetrics, ResultRow};

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_FAILED: &str = "failed";

const RESULT_COLUMNS: &str = "id, run_id, model_name, prompt_name, success, response_time_seconds, error,
    extracted_code, syntax_valid, syntax_error, runs_without_error, timed_out, execution_output,
    line_count, has_function_def, has_class_def, has_docstring, has_comments, has_error_handling,
    imports_used, keyword_match_ratio, found_keywords, composite_score";

const RUN_COLUMNS: &str =
    "id, status, attempts_total, attempts_completed, score_scale, error, started_at, completed_at";

/// SQLite store for runs and their per-attempt rows. Aggregates are never
/// stored; they are recomputed from rows on read.
pub struct ResultsDb {
    conn: Mutex<Connection>,
}

impl ResultsDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS bench_runs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                attempts_total INTEGER NOT NULL DEFAULT 0,
                attempts_completed INTEGER NOT NULL DEFAULT 0,
                score_scale REAL NOT NULL,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS bench_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES bench_runs(id) ON DELETE CASCADE,
                model_name TEXT NOT NULL,
                prompt_name TEXT NOT NULL,
                success INTEGER NOT NULL,
                response_time_seconds REAL NOT NULL,
                error TEXT,

                extracted_code TEXT,
                syntax_valid INTEGER NOT NULL DEFAULT 0,
                syntax_error TEXT,
                runs_without_error INTEGER NOT NULL DEFAULT 0,
                timed_out INTEGER NOT NULL DEFAULT 0,
                execution_output TEXT,

                line_count INTEGER,
                has_function_def INTEGER,
                has_class_def INTEGER,
                has_docstring INTEGER,
                has_comments INTEGER,
                has_error_handling INTEGER,
                imports_used INTEGER,

                keyword_match_ratio REAL,
                found_keywords TEXT,
                composite_score REAL,

                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_br_run_id ON bench_results(run_id);
            CREATE INDEX IF NOT EXISTS idx_br_model ON bench_results(model_name);
            CREATE INDEX IF NOT EXISTS idx_runs_started ON bench_runs(started_at);
            CREATE INDEX IF NOT EXISTS idx_runs_status ON bench_runs(status);
        ",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Runs
    // ========================================================================

    pub fn insert_run(&self, run: &BenchRun) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO bench_runs (id, status, attempts_total, attempts_completed, score_scale, error, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id,
                run.status,
                run.attempts_total,
                run.attempts_completed,
                run.score_scale,
                run.error,
                run.started_at,
                run.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_run_progress(&self, run_id: &str, attempts_completed: i64) -> anyhow::Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE bench_runs SET attempts_completed=?2 WHERE id=?1",
            params![run_id, attempts_completed],
        )?;
        Ok(())
    }

    pub fn complete_run(&self, run_id: &str, status: &str, error: Option<&str>) -> anyhow::Result<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            "UPDATE bench_runs SET status=?2, error=?3, completed_at=?4 WHERE id=?1",
            params![run_id, status, error, now],
        )?;
        if updated == 0 {
            anyhow::bail!("run not found: {}", run_id);
        }
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> anyhow::Result<Option<BenchRun>> {
        let conn = self.conn();
        let run = conn
            .query_row(
                &format!("SELECT {} FROM bench_runs WHERE id=?1", RUN_COLUMNS),
                params![run_id],
                map_run,
            )
            .optional()?;
        Ok(run)
    }

    /// All runs, most recent first.
    pub fn list_runs(&self) -> anyhow::Result<Vec<BenchRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bench_runs ORDER BY started_at DESC, id",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map([], map_run)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ========================================================================
    // Results
    // ========================================================================

    pub fn insert_result(&self, result: &ResultRow) -> anyhow::Result<i64> {
        let conn = self.conn();
        insert_result_with(&conn, result)?;
        Ok(conn.last_insert_rowid())
    }

    /// Store one finished attempt and bump the run's progress counter
    /// together, so a reader never sees one without the other.
    pub fn record_attempt(
        &self,
        run_id: &str,
        attempts_completed: i64,
        result: &ResultRow,
    ) -> anyhow::Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_result_with(&tx, result)?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE bench_runs SET attempts_completed=?2 WHERE id=?1",
            params![run_id, attempts_completed],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn get_results_for_run(&self, run_id: &str) -> anyhow::Result<Vec<ResultRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bench_results WHERE run_id=?1 ORDER BY id",
            RESULT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![run_id], map_result)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn insert_result_with(conn: &Connection, result: &ResultRow) -> anyhow::Result<()> {
    let q = result.quality_metrics.as_ref();
    let found_keywords = serde_json::to_string(&result.found_keywords)?;

    conn.execute(
        "INSERT INTO bench_results (run_id, model_name, prompt_name, success, response_time_seconds, error,
            extracted_code, syntax_valid, syntax_error, runs_without_error, timed_out, execution_output,
            line_count, has_function_def, has_class_def, has_docstring, has_comments, has_error_handling, imports_used,
            keyword_match_ratio, found_keywords, composite_score, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            result.run_id,
            result.model_name,
            result.prompt_name,
            result.success,
            result.response_time_seconds,
            result.error,
            result.extracted_code,
            result.syntax_valid,
            result.syntax_error,
            result.runs_without_error,
            result.timed_out,
            result.execution_output,
            q.map(|m| m.line_count as i64),
            q.map(|m| m.has_function_def),
            q.map(|m| m.has_class_def),
            q.map(|m| m.has_docstring),
            q.map(|m| m.has_comments),
            q.map(|m| m.has_error_handling),
            q.map(|m| m.imports_used as i64),
            result.keyword_match_ratio,
            found_keywords,
            result.composite_score,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn map_run(row: &Row<'_>) -> rusqlite::Result<BenchRun> {
    Ok(BenchRun {
        id: row.get(0)?,
        status: row.get(1)?,
        attempts_total: row.get(2)?,
        attempts_completed: row.get(3)?,
        score_scale: row.get(4)?,
        error: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

fn map_result(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    let quality_metrics = match row.get::<_, Option<i64>>(13)? {
        Some(line_count) => Some(QualityMetrics {
            line_count: line_count.max(0) as usize,
            has_function_def: row.get::<_, Option<bool>>(14)?.unwrap_or(false),
            has_class_def: row.get::<_, Option<bool>>(15)?.unwrap_or(false),
            has_docstring: row.get::<_, Option<bool>>(16)?.unwrap_or(false),
            has_comments: row.get::<_, Option<bool>>(17)?.unwrap_or(false),
            has_error_handling: row.get::<_, Option<bool>>(18)?.unwrap_or(false),
            imports_used: row.get::<_, Option<i64>>(19)?.unwrap_or(0).max(0) as usize,
        }),
        None => None,
    };

    Ok(ResultRow {
        id: row.get(0)?,
        run_id: row.get(1)?,
        model_name: row.get(2)?,
        prompt_name: row.get(3)?,
        success: row.get(4)?,
        response_time_seconds: row.get(5)?,
        error: row.get(6)?,
        extracted_code: row.get(7)?,
        syntax_valid: row.get(8)?,
        syntax_error: row.get(9)?,
        runs_without_error: row.get(10)?,
        timed_out: row.get(11)?,
        execution_output: row.get(12)?,
        quality_metrics,
        keyword_match_ratio: row.get(20)?,
        found_keywords: row
            .get::<_, Option<String>>(21)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        composite_score: row.get(22)?,
    })
}
