//! Local runner implementation
//!
//! Spawns child processes directly. Each child leads its own process group
//! so a timeout (or a dropped request) kills everything it started, not
//! just the direct child.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};

/// How long to wait for pipes to close once the process group is gone
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Runner that executes commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a command, killing its process group when the timeout expires
    pub async fn execute(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin_content: Option<&str>,
    ) -> Result<RunOutcome> {
        debug!("Running {:?} (timeout {:?})", cmd.to_vec(), limits.timeout);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin_content.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        if let Some(dir) = &cmd.work_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd.program))?;
        let mut group = ProcessGroup::new(child.id());

        // Write stdin from a task so a program that never reads cannot block us
        let stdin_task = match (stdin_content, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_owned();
                Some(tokio::spawn(async move {
                    let _ = pipe.write_all(input.as_bytes()).await;
                }))
            }
            _ => None,
        };

        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), limits.max_output_bytes));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), limits.max_output_bytes));

        let waited = tokio::time::timeout(limits.timeout, child.wait()).await;

        // Kill stragglers either way; they may still hold our pipes open
        group.kill();

        if let Some(task) = stdin_task {
            task.abort();
        }

        let exit_status = match waited {
            Ok(status) => status.context("Failed to wait for child process")?,
            Err(_) => {
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                debug!("{} exceeded {:?}, process group killed", cmd.program, limits.timeout);
                return Ok(RunOutcome {
                    status: RunStatus::TimeLimitExceeded,
                    stdout: String::new(),
                    stderr: String::new(),
                    elapsed: started.elapsed(),
                    truncated: false,
                });
            }
        };
        let elapsed = started.elapsed();

        let (stdout, stdout_truncated) = collect_output(stdout_task).await?;
        let (stderr, stderr_truncated) = collect_output(stderr_task).await?;

        let status = match exit_status.code() {
            Some(code) => RunStatus::Exited(code),
            None => RunStatus::Signaled(exit_status.signal().unwrap_or(-1)),
        };

        Ok(RunOutcome {
            status,
            stdout,
            stderr,
            elapsed,
            truncated: stdout_truncated || stderr_truncated,
        })
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome> {
        self.execute(cmd, limits, stdin).await
    }
}

/// Process group of a spawned child, killed on drop unless already killed
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

type OutputTask = tokio::task::JoinHandle<std::io::Result<(String, bool)>>;

async fn collect_output(task: OutputTask) -> Result<(String, bool)> {
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, task).await {
        Ok(joined) => {
            let read = joined.context("Output reader task failed")?;
            Ok(read.context("Failed to read child output")?)
        }
        // A detached grandchild outside our group still holds the pipe
        Err(_) => Ok((String::new(), false)),
    }
}

/// Read a pipe to the end, keeping at most `limit` bytes
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<(String, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((String::new(), false));
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }

    if truncated {
        trim_partial_char(&mut buf);
    }
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

/// Drop a multi-byte character the cap cut in half
fn trim_partial_char(buf: &mut Vec<u8>) {
    if let Err(e) = std::str::from_utf8(buf) {
        // error_len() is None only for a sequence cut off at the end
        if e.error_len().is_none() {
            buf.truncate(e.valid_up_to());
        }
    }
}
