use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::OUTPUT_DRAIN_TIMEOUT_MS;
use crate::error::BenchError;

/// Captured output is truncated past this many bytes per stream.
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Outcome of a child process run under a wall-clock limit.
#[derive(Debug)]
pub struct BoundedOutput {
    /// `None` when the child was killed for exceeding the limit.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl BoundedOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Spawn `command`, optionally feed it `stdin`, and wait at most `limit`.
///
/// On timeout the child is killed and reaped before this returns. Only
/// failures to spawn or wait are errors; a non-zero exit is a normal outcome.
pub async fn run_bounded(
    mut command: Command,
    stdin: Option<&[u8]>,
    limit: Duration,
) -> Result<BoundedOutput, BenchError> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|e| BenchError::Process(format!("Failed to spawn {}: {}", program, e)))?;

    debug!("Spawned {} (pid {:?})", program, child.id());

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // Written from a task so a child that never reads cannot block us
        // past the limit; dropping the pipe signals EOF.
        let input = input.to_vec();
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                debug!("Child stdin closed early: {}", e);
            }
        });
    }

    let mut stdout_task = child.stdout.take().map(|s| tokio::spawn(read_capped(s)));
    let mut stderr_task = child.stderr.take().map(|s| tokio::spawn(read_capped(s)));

    match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = drain(stdout_task.as_mut()).await;
            let stderr = drain(stderr_task.as_mut()).await;
            Ok(BoundedOutput {
                status: Some(status),
                stdout,
                stderr,
                timed_out: false,
                elapsed: started.elapsed(),
            })
        }
        Ok(Err(e)) => {
            let _ = child.kill().await;
            abort(stdout_task);
            abort(stderr_task);
            Err(BenchError::Process(format!(
                "Failed waiting for {}: {}",
                program, e
            )))
        }
        Err(_) => {
            warn!(
                "{} exceeded {:.1}s limit, killing",
                program,
                limit.as_secs_f64()
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", program, e);
            }
            let stdout = drain(stdout_task.as_mut()).await;
            let stderr = drain(stderr_task.as_mut()).await;
            Ok(BoundedOutput {
                status: None,
                stdout,
                stderr,
                timed_out: true,
                elapsed: started.elapsed(),
            })
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = MAX_CAPTURE_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Error reading child output: {}", e);
                break;
            }
        }
    }
    kept
}

/// Collect a reader task, giving up after a short grace period (a grandchild
/// may still hold the pipe open).
async fn drain(task: Option<&mut JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = task else {
        return String::new();
    };
    match tokio::time::timeout(Duration::from_millis(OUTPUT_DRAIN_TIMEOUT_MS), &mut *handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            debug!("Output reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            handle.abort();
            String::new()
        }
    }
}

fn abort(task: Option<JoinHandle<Vec<u8>>>) {
    if let Some(handle) = task {
        handle.abort();
    }
}
