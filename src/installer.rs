//! Package installation
//!
//! Installs each detected dependency with the language's package manager,
//! into the request's own workspace so concurrent requests never share a
//! `site-packages` or `node_modules`. Maven copies jars into the workspace
//! but keeps its plugins in the user's local repository, so java installs
//! are serialized. Every dependency is attempted; failures are reported
//! together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyzer::DependencySet;
use crate::core::utils::{render_argv, tail};
use crate::core::{ExecError, InstallFailure};
use crate::languages::{Language, LanguageProfile};
use crate::runner::{CommandSpec, RunLimits, Runner};
use crate::workspace::Workspace;

/// Characters of package-manager output kept per failure
const FAILURE_MESSAGE_CHARS: usize = 500;

pub struct Installer {
    runner: Arc<dyn Runner>,
    max_output_bytes: usize,
    /// Held for a whole request's installs when the language shares a cache
    shared_cache_locks: HashMap<Language, Mutex<()>>,
}

impl Installer {
    pub fn new(runner: Arc<dyn Runner>, max_output_bytes: usize) -> Self {
        Self {
            runner,
            max_output_bytes,
            shared_cache_locks: Language::ALL
                .into_iter()
                .map(|language| (language, Mutex::new(())))
                .collect(),
        }
    }

    /// Install every dependency, continuing past failures
    pub async fn install_all(
        &self,
        profile: &LanguageProfile,
        deps: &DependencySet,
        workspace: &Workspace,
    ) -> Result<(), ExecError> {
        if deps.is_empty() {
            return Ok(());
        }

        if profile.install_command.is_none() {
            info!(
                "{} has no package manager, not installing {:?}",
                profile.language, deps
            );
            return Ok(());
        }

        tokio::fs::create_dir_all(workspace.deps_dir()).await?;

        let _shared_cache = match self.shared_cache_locks.get(&profile.language) {
            Some(lock) if profile.shared_install_cache => {
                debug!("Waiting for the shared {} install cache", profile.language);
                Some(lock.lock().await)
            }
            _ => None,
        };

        let mut attempted = HashSet::new();
        let mut failures = Vec::new();

        for package in deps {
            let targets = match install_targets(profile, package) {
                Ok(targets) => targets,
                Err(failure) => {
                    warn!("Cannot install {}: {}", package, failure.message);
                    failures.push(failure);
                    continue;
                }
            };

            for target in targets {
                // Several java packages can map to one artifact
                if !attempted.insert(target.clone()) {
                    continue;
                }

                if let Err(failure) = self.install(profile, package, &target, workspace).await {
                    warn!("Failed to install {}: {}", package, failure.message);
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            info!(
                "Installed {} {} dependencies into workspace {}",
                attempted.len(),
                profile.language,
                workspace.id()
            );
            Ok(())
        } else {
            Err(ExecError::Dependency(failures))
        }
    }

    /// Run the package manager once for a single package
    pub async fn install(
        &self,
        profile: &LanguageProfile,
        package: &str,
        target: &str,
        workspace: &Workspace,
    ) -> Result<(), InstallFailure> {
        let failure = |message: String| InstallFailure {
            package: package.to_string(),
            message,
        };

        let Some(template) = &profile.install_command else {
            debug!("No install step for {} package {}", profile.language, package);
            return Ok(());
        };

        let dir = workspace.path().to_string_lossy().to_string();
        let deps = workspace.deps_dir().to_string_lossy().to_string();
        let lib = workspace.lib_dir().to_string_lossy().to_string();
        let argv = render_argv(
            template,
            &[("package", target), ("dir", &dir), ("deps", &deps), ("lib", &lib)],
        );
        let cmd = CommandSpec::from_vec(&argv).with_work_dir(workspace.path());
        let limits = RunLimits::new(profile.install_timeout, self.max_output_bytes);

        debug!("Installing {} with {:?}", package, argv);

        let outcome = self
            .runner
            .run(&cmd, &limits, None)
            .await
            .map_err(|e| failure(format!("{:#}", e)))?;

        if outcome.is_success() {
            Ok(())
        } else {
            let message = outcome.failure_message("Install", profile.install_timeout);
            Err(failure(tail(&message, FAILURE_MESSAGE_CHARS)))
        }
    }
}

/// What to hand the package manager for a detected package
fn install_targets(
    profile: &LanguageProfile,
    package: &str,
) -> Result<Vec<String>, InstallFailure> {
    match profile.language {
        Language::Java => profile
            .artifact_for(package)
            .map(|coordinates| {
                coordinates
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect()
            })
            .ok_or_else(|| InstallFailure {
                package: package.to_string(),
                message: "no Maven artifact is known for this package".to_string(),
            }),
        _ => Ok(vec![package.to_string()]),
    }
}
