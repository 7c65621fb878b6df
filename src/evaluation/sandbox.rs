use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::ExecutionResult;
use crate::config::LanguageProfile;
use crate::error::BenchError;
use crate::process::bounded::run_bounded;

pub const TIMEOUT_MESSAGE: &str = "Timeout - code ran too long";

/// Disposable workspace holding one snippet file. The directory and
/// everything in it is removed when the job is dropped.
pub struct ExecutionJob {
    workspace: TempDir,
    script: PathBuf,
}

impl ExecutionJob {
    pub fn prepare(base: Option<&Path>, extension: &str, code: &str) -> Result<Self, BenchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("snippet-");
        let workspace = match base {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };
        let script = workspace.path().join(format!("snippet.{}", extension));
        std::fs::write(&script, code)?;
        Ok(ExecutionJob { workspace, script })
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn dir(&self) -> &Path {
        self.workspace.path()
    }
}

/// Runs untrusted snippets in a child process under a hard wall-clock limit.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    language: LanguageProfile,
    timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl SandboxExecutor {
    pub fn new(language: LanguageProfile, timeout: Duration, work_dir: Option<PathBuf>) -> Self {
        Self {
            language,
            timeout,
            work_dir,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Never fails and never retries. The workspace is gone by the time this
    /// returns, whatever the outcome.
    pub async fn execute(&self, code: &str) -> ExecutionResult {
        match self.execute_inner(code).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Sandbox fault ({}): {}", e.kind(), e);
                ExecutionResult {
                    ran_without_error: false,
                    stdout_or_error_text: e.to_string(),
                    timed_out: false,
                }
            }
        }
    }

    async fn execute_inner(&self, code: &str) -> Result<ExecutionResult, BenchError> {
        let job = ExecutionJob::prepare(
            self.work_dir.as_deref(),
            &self.language.file_extension,
            code,
        )?;

        let mut cmd = Command::new(&self.language.interpreter);
        cmd.args(&self.language.interpreter_args)
            .arg(job.script())
            .current_dir(job.dir());

        let out = run_bounded(cmd, None, self.timeout).await?;
        drop(job);

        if out.timed_out {
            info!(
                "Snippet timed out after {:.1}s",
                self.timeout.as_secs_f64()
            );
            return Ok(ExecutionResult {
                ran_without_error: false,
                stdout_or_error_text: TIMEOUT_MESSAGE.to_string(),
                timed_out: true,
            });
        }

        debug!(
            "Snippet exited with {:?} in {:.2}s",
            out.status,
            out.elapsed.as_secs_f64()
        );

        Ok(if out.success() {
            ExecutionResult {
                ran_without_error: true,
                stdout_or_error_text: out.stdout,
                timed_out: false,
            }
        } else {
            ExecutionResult {
                ran_without_error: false,
                stdout_or_error_text: out.stderr,
                timed_out: false,
            }
        })
    }
}
