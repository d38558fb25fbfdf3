//! Runner module - Process execution abstraction
//!
//! Every install, compile and run step goes through the `Runner` trait as
//! a structured argv command (never a shell string). `LocalRunner` spawns
//! real child processes; tests substitute scripted runners.
//!
//! The runner module does NOT:
//! - Decide whether a non-zero exit is a compile or runtime error
//! - Know about workspaces or language profiles

pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Environment overrides (added to the inherited environment)
    pub env: Vec<(String, String)>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        let args: Vec<String> = iter.cloned().collect();
        Self {
            program,
            args,
            env: Vec::new(),
            work_dir: None,
        }
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.clone());
        v
    }
}

/// Limits applied to a single process
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock limit; the whole process group is killed when it expires
    pub timeout: Duration,
    /// Bytes kept from each of stdout and stderr
    pub max_output_bytes: usize,
}

impl RunLimits {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }
}

/// Execution status (raw, no error-kind interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Wall-clock limit exceeded; the process group was killed
    TimeLimitExceeded,
    /// Killed by signal
    Signaled(i32),
}

impl RunStatus {
    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

/// Outcome of running a program
#[derive(Debug)]
pub struct RunOutcome {
    /// Execution status
    pub status: RunStatus,
    /// Stdout content (empty after a timeout)
    pub stdout: String,
    /// Stderr content (empty after a timeout)
    pub stderr: String,
    /// Wall-clock time
    pub elapsed: Duration,
    /// Output exceeded `max_output_bytes` and was cut
    pub truncated: bool,
}

impl RunOutcome {
    /// Check if execution was successful
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Best human-readable reason for a failed run
    pub fn failure_message(&self, stage: &str, timeout: Duration) -> String {
        match self.status {
            RunStatus::TimeLimitExceeded => {
                format!("{} timed out after {}s", stage, timeout.as_secs_f64())
            }
            _ if !self.stderr.trim().is_empty() => self.stderr.clone(),
            _ if !self.stdout.trim().is_empty() => self.stdout.clone(),
            RunStatus::Signaled(sig) => format!("{} killed by signal {}", stage, sig),
            RunStatus::Exited(code) => format!("{} failed with exit code {}", stage, code),
        }
    }
}

/// Runner trait for executing programs
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command with the given limits and optional stdin
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome>;
}

// Re-exports
pub use local::LocalRunner;

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: RunStatus, stdout: &str, stderr: &str) -> RunOutcome {
        RunOutcome {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            elapsed: Duration::ZERO,
            truncated: false,
        }
    }

    #[test]
    fn test_from_vec_splits_program_and_args() {
        let spec = CommandSpec::from_vec(&["gcc".into(), "-O2".into(), "main.c".into()]);
        assert_eq!(spec.program, "gcc");
        assert_eq!(spec.args, vec!["-O2", "main.c"]);
        assert_eq!(spec.to_vec(), vec!["gcc", "-O2", "main.c"]);
    }

    #[test]
    fn test_failure_message_prefers_stderr() {
        let timeout = Duration::from_secs(5);
        let o = outcome(RunStatus::Exited(1), "partial", "Traceback: boom");
        assert_eq!(o.failure_message("Program", timeout), "Traceback: boom");

        let o = outcome(RunStatus::Exited(3), "", "");
        assert_eq!(
            o.failure_message("Program", timeout),
            "Program failed with exit code 3"
        );

        let o = outcome(RunStatus::TimeLimitExceeded, "", "");
        assert_eq!(o.failure_message("Program", timeout), "Program timed out after 5s");

        let o = outcome(RunStatus::Signaled(11), "", "");
        assert_eq!(
            o.failure_message("Program", timeout),
            "Program killed by signal 11"
        );
    }
}
