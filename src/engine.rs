//! Execution engine
//!
//! Drives one request through
//! `Validating -> ResolvingDependencies -> (Compiling ->) Running -> Cleaning`
//! and ends in `Done` with the program's stdout or `Failed` with a typed
//! error. Every allocated workspace is cleaned up exactly once.
//!
//! The engine does NOT:
//! - Parse HTTP requests or pick status codes
//! - Apply rate limits (admission is only bounded by `MAX_CONCURRENT_RUNS`)

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::analyzer::{detect_dependencies, public_class_name, DependencySet};
use crate::compiler::{self, plan_execution, source_file_name};
use crate::core::ExecError;
use crate::installer::Installer;
use crate::languages::{Language, LanguageProfile, LanguageRegistry};
use crate::runner::{RunLimits, Runner};
use crate::workspace::{Workspace, WorkspaceManager};

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// One program to execute
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source_code: String,
    pub stdin: Option<String>,
}

impl ExecutionRequest {
    pub fn new(language: Language, source_code: impl Into<String>) -> Self {
        Self {
            language,
            source_code: source_code.into(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Validating,
    ResolvingDependencies,
    Compiling,
    Running,
    Cleaning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Validating => "validating",
            Stage::ResolvingDependencies => "resolving dependencies",
            Stage::Compiling => "compiling",
            Stage::Running => "running",
            Stage::Cleaning => "cleaning",
        };
        write!(f, "{}", s)
    }
}

fn enter(language: Language, workspace: Option<&str>, stage: Stage) {
    match workspace {
        Some(id) => debug!("[{}] {} request {}", id, language, stage),
        None => debug!("{} request {}", language, stage),
    }
}

pub struct Engine {
    registry: Arc<LanguageRegistry>,
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<dyn Runner>,
    installer: Installer,
    permits: Arc<Semaphore>,
    max_output_bytes: usize,
}

impl Engine {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        workspaces: Arc<WorkspaceManager>,
        runner: Arc<dyn Runner>,
        max_output_bytes: usize,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            installer: Installer::new(Arc::clone(&runner), max_output_bytes),
            registry,
            workspaces,
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            max_output_bytes,
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Execute a program and return its stdout
    pub async fn execute(&self, request: ExecutionRequest) -> Result<String, ExecError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExecError::Internal("execution engine is shutting down".to_string()))?;

        let language = request.language;
        let profile = self.registry.get(language);
        let started = Instant::now();

        enter(language, None, Stage::Validating);
        let class_name = validate(profile, &request.source_code)?;

        enter(language, None, Stage::ResolvingDependencies);
        let deps = detect_dependencies(profile, &request.source_code)?;

        let source_file = source_file_name(profile, class_name.as_deref());
        let workspace =
            self.workspaces
                .allocate(language, &source_file, profile.binary_file.as_deref())?;

        // A cancelled request never reaches cleanup; Workspace's Drop covers it
        let result = self
            .run_in_workspace(profile, &request, &deps, &workspace, class_name.as_deref())
            .await;

        enter(language, Some(workspace.id()), Stage::Cleaning);
        let id = workspace.id().to_string();
        workspace.cleanup().await;

        match &result {
            Ok(_) => info!("[{}] {} request done in {:?}", id, language, started.elapsed()),
            Err(e) => info!(
                "[{}] {} request failed with {} after {:?}",
                id,
                language,
                e.kind(),
                started.elapsed()
            ),
        }

        result
    }

    async fn run_in_workspace(
        &self,
        profile: &LanguageProfile,
        request: &ExecutionRequest,
        deps: &DependencySet,
        workspace: &Workspace,
        class_name: Option<&str>,
    ) -> Result<String, ExecError> {
        let language = request.language;

        workspace.write_source(&request.source_code).await?;
        self.installer.install_all(profile, deps, workspace).await?;

        let plan = plan_execution(profile, workspace, class_name);

        if let Some(compile) = plan.compile() {
            enter(language, Some(workspace.id()), Stage::Compiling);
            compiler::compile(
                self.runner.as_ref(),
                compile,
                profile.compile_timeout,
                self.max_output_bytes,
            )
            .await?;
        }

        enter(language, Some(workspace.id()), Stage::Running);
        let limits = RunLimits::new(profile.run_timeout, self.max_output_bytes);
        let outcome = self
            .runner
            .run(plan.run(), &limits, request.stdin.as_deref())
            .await?;

        if !outcome.is_success() {
            return Err(ExecError::Runtime(
                outcome.failure_message("Program", profile.run_timeout),
            ));
        }

        let mut output = outcome.stdout;
        if outcome.truncated {
            warn!(
                "[{}] output exceeded {} bytes and was truncated",
                workspace.id(),
                self.max_output_bytes
            );
            output.push_str(TRUNCATION_MARKER);
        }
        Ok(output)
    }
}

/// Checks that need no process and no file. Returns the java class name.
fn validate(profile: &LanguageProfile, source: &str) -> Result<Option<String>, ExecError> {
    if source.trim().is_empty() {
        return Err(ExecError::Validation(
            "Validation Error: no code provided".to_string(),
        ));
    }

    match profile.language {
        Language::Java => public_class_name(source).map(Some),
        _ => Ok(None),
    }
}
