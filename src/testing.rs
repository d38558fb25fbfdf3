//! Test doubles shared by unit tests

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::runner::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};

type Script = Box<dyn Fn(&CommandSpec) -> Result<RunOutcome> + Send + Sync>;

/// Runner that answers from a script and records every command it sees
pub struct ScriptedRunner {
    script: Script,
    calls: Mutex<Vec<(CommandSpec, RunLimits)>>,
}

impl ScriptedRunner {
    pub fn new(script: impl Fn(&CommandSpec) -> Result<RunOutcome> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds with empty output
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(outcome(RunStatus::Exited(0), "", "")))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(cmd, _)| cmd.clone())
            .collect()
    }

    pub fn limits(&self) -> Vec<RunLimits> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, limits)| limits.clone())
            .collect()
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        _stdin: Option<&str>,
    ) -> Result<RunOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((cmd.clone(), limits.clone()));
        (self.script)(cmd)
    }
}

pub fn outcome(status: RunStatus, stdout: &str, stderr: &str) -> RunOutcome {
    RunOutcome {
        status,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        elapsed: Duration::from_millis(1),
        truncated: false,
    }
}

/// True when a toolchain binary can be started on this machine
pub fn has_tool(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}
