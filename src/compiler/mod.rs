//! Compiler module - execution planning and the compile stage
//!
//! This module provides:
//! - The per-language strategy table: one-stage (interpret) or two-stage
//!   (compile, then run) plans built from the profile's argv templates
//! - Compile stage execution with compiler diagnostics as the error

use std::time::Duration;

use tracing::{debug, info};

use crate::core::utils::{render, render_argv};
use crate::core::ExecError;
use crate::languages::LanguageProfile;
use crate::runner::{CommandSpec, RunLimits, Runner};
use crate::workspace::Workspace;

/// Commands needed to execute one program
#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    /// Interpreted: run the source directly
    OneStage { run: CommandSpec },
    /// Compiled: build an artifact, then run it
    TwoStage {
        compile: CommandSpec,
        run: CommandSpec,
    },
}

impl ExecutionPlan {
    pub fn compile(&self) -> Option<&CommandSpec> {
        match self {
            ExecutionPlan::OneStage { .. } => None,
            ExecutionPlan::TwoStage { compile, .. } => Some(compile),
        }
    }

    pub fn run(&self) -> &CommandSpec {
        match self {
            ExecutionPlan::OneStage { run } | ExecutionPlan::TwoStage { run, .. } => run,
        }
    }
}

/// File name the source must be written to (java: `<Class>.java`)
pub fn source_file_name(profile: &LanguageProfile, class_name: Option<&str>) -> String {
    render(&profile.source_file, &[("class", class_name.unwrap_or("Main"))])
}

/// Build the plan for a prepared workspace. Call after dependencies are
/// installed: the java classpath is collected from the dependency root.
pub fn plan_execution(
    profile: &LanguageProfile,
    workspace: &Workspace,
    class_name: Option<&str>,
) -> ExecutionPlan {
    let source = workspace.source_path().to_string_lossy().to_string();
    let binary = workspace
        .binary_path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = workspace.path().to_string_lossy().to_string();
    let deps = workspace.deps_dir().to_string_lossy().to_string();
    let lib = workspace.lib_dir().to_string_lossy().to_string();

    let needs_classpath = profile
        .compile_command
        .iter()
        .chain(std::iter::once(&profile.run_command))
        .flatten()
        .any(|arg| arg.contains("{classpath}"));
    let classpath = if needs_classpath {
        workspace.classpath()
    } else {
        String::new()
    };

    let vars = [
        ("source", source.as_str()),
        ("binary", binary.as_str()),
        ("dir", dir.as_str()),
        ("class", class_name.unwrap_or("Main")),
        ("deps", deps.as_str()),
        ("lib", lib.as_str()),
        ("classpath", classpath.as_str()),
    ];

    let env: Vec<(String, String)> = profile
        .run_env
        .iter()
        .map(|(key, value)| (key.clone(), render(value, &vars)))
        .collect();

    let build = |template: &[String]| {
        CommandSpec::from_vec(&render_argv(template, &vars))
            .with_env(env.clone())
            .with_work_dir(workspace.path())
    };

    let run = build(&profile.run_command);
    match &profile.compile_command {
        Some(compile) => ExecutionPlan::TwoStage {
            compile: build(compile),
            run,
        },
        None => ExecutionPlan::OneStage { run },
    }
}

/// Run the compile stage; any failure carries the compiler's diagnostics
pub async fn compile(
    runner: &dyn Runner,
    cmd: &CommandSpec,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<(), ExecError> {
    debug!("Compiling with {:?}", cmd.to_vec());

    let limits = RunLimits::new(timeout, max_output_bytes);
    let outcome = runner.run(cmd, &limits, None).await?;

    if outcome.is_success() {
        info!("Compiled in {:?}", outcome.elapsed);
        Ok(())
    } else {
        Err(ExecError::Compile(outcome.failure_message("Compilation", timeout)))
    }
}
