//! Per-request workspaces
//!
//! Every request gets its own directory under the workspace root, named
//! with a random token. It holds the source file, the compiled artifact and
//! the isolated dependency root, and is removed when the request finishes:
//! explicitly through `Workspace::cleanup`, or by `Drop` if the request
//! future is cancelled or panics first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::languages::Language;

const WORKSPACE_PREFIX: &str = "run-";
const CLEANUP_RETRY_DELAY: Duration = Duration::from_millis(100);
const LIB_DIR: &str = "lib";

/// Allocates workspaces under a shared root directory
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    cleanup_failures: Arc<AtomicU64>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace root {}", root.display()))?;

        Ok(Self {
            root,
            cleanup_failures: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of workspaces that could not be removed
    pub fn cleanup_failures(&self) -> u64 {
        self.cleanup_failures.load(Ordering::Relaxed)
    }

    /// Create a fresh, uniquely named workspace directory
    pub fn allocate(
        &self,
        language: Language,
        source_file: &str,
        binary_file: Option<&str>,
    ) -> std::io::Result<Workspace> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .rand_bytes(12)
            .tempdir_in(&self.root)?;

        let path = dir.path().to_path_buf();
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().trim_start_matches(WORKSPACE_PREFIX).to_string())
            .unwrap_or_default();

        debug!("Allocated workspace {} for {}", path.display(), language);

        Ok(Workspace {
            source_path: path.join(source_file),
            binary_path: binary_file.map(|name| path.join(name)),
            deps_dir: path.join("deps"),
            id,
            path,
            dir: Some(dir),
            cleanup_failures: Arc::clone(&self.cleanup_failures),
        })
    }

    /// Remove workspaces left behind by a previous process (crash, kill -9)
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read workspace root {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            let is_workspace = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(WORKSPACE_PREFIX));
            if !is_workspace || !path.is_dir() {
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());

            if age.is_some_and(|age| age >= max_age) {
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove stale workspace {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Removed {} stale workspaces from {}", removed, self.root.display());
        }
        removed
    }
}

/// Files belonging to one execution request
#[derive(Debug)]
pub struct Workspace {
    id: String,
    path: PathBuf,
    source_path: PathBuf,
    binary_path: Option<PathBuf>,
    deps_dir: PathBuf,
    /// Owns the directory; `None` once cleaned up
    dir: Option<TempDir>,
    cleanup_failures: Arc<AtomicU64>,
}

impl Workspace {
    /// Random token naming this workspace
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn binary_path(&self) -> Option<&Path> {
        self.binary_path.as_deref()
    }

    /// Isolated install target for this request's dependencies
    pub fn deps_dir(&self) -> &Path {
        &self.deps_dir
    }

    /// Jars copied for this request; the only ones on the java classpath
    pub fn lib_dir(&self) -> PathBuf {
        self.deps_dir.join(LIB_DIR)
    }

    pub async fn write_source(&self, code: &str) -> std::io::Result<()> {
        tokio::fs::write(&self.source_path, code).await
    }

    /// Workspace directory followed by the jars in `lib_dir`
    pub fn classpath(&self) -> String {
        let mut entries = vec![self.path.to_string_lossy().to_string()];
        let mut jars = list_jars(&self.lib_dir());
        jars.sort();
        entries.extend(jars.iter().map(|jar| jar.to_string_lossy().to_string()));
        entries.join(":")
    }

    /// Remove the workspace directory, retrying once after a short delay.
    /// Persistent failures are logged and counted, never returned.
    pub async fn cleanup(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        let first = tokio::fs::remove_dir_all(&self.path).await;
        let result = match first {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                debug!("Retrying cleanup of {} after: {}", self.path.display(), e);
                tokio::time::sleep(CLEANUP_RETRY_DELAY).await;
                match tokio::fs::remove_dir_all(&self.path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                }
            }
        };

        match result {
            Ok(()) => debug!("Cleaned up workspace {}", self.id),
            Err(e) => {
                self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    workspace = %self.id,
                    path = %self.path.display(),
                    error = %e,
                    "workspace cleanup failed"
                );
            }
        }

        // Already removed (or unremovable); TempDir's own attempt is moot
        drop(dir);
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    workspace = %self.id,
                    path = %self.path.display(),
                    error = %e,
                    "workspace cleanup on drop failed"
                );
            }
        }
    }
}

fn list_jars(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "jar"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn manager() -> (tempfile::TempDir, WorkspaceManager) {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path().join("workspaces")).unwrap();
        (root, manager)
    }

    #[tokio::test]
    async fn test_allocate_and_cleanup() {
        let (_root, manager) = manager();
        let ws = manager
            .allocate(Language::C, "main.c", Some("main"))
            .unwrap();
        ws.write_source("int main(){return 0;}").await.unwrap();
        std::fs::write(ws.binary_path().unwrap(), b"binary").unwrap();

        let path = ws.path().to_path_buf();
        assert!(ws.source_path().exists());
        assert!(ws.source_path().starts_with(&path));
        assert!(path.starts_with(manager.root()));

        ws.cleanup().await;
        assert!(!path.exists());
        assert_eq!(manager.cleanup_failures(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let (_root, manager) = manager();
        let path = {
            let ws = manager.allocate(Language::Python, "main.py", None).unwrap();
            ws.write_source("print(1)").await.unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_already_removed() {
        let (_root, manager) = manager();
        let ws = manager.allocate(Language::Python, "main.py", None).unwrap();
        std::fs::remove_dir_all(ws.path()).unwrap();
        ws.cleanup().await;
        assert_eq!(manager.cleanup_failures(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_unique() {
        let (_root, manager) = manager();
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let ws = manager.allocate(Language::Cpp, "main.cpp", Some("main")).unwrap();
                    ws.write_source(&format!("// request {}", i)).await.unwrap();
                    ws
                })
            })
            .collect();

        let mut workspaces = Vec::new();
        for handle in handles {
            workspaces.push(handle.await.unwrap());
        }

        let sources: HashSet<_> = workspaces.iter().map(|ws| ws.source_path().to_path_buf()).collect();
        let binaries: HashSet<_> = workspaces
            .iter()
            .map(|ws| ws.binary_path().unwrap().to_path_buf())
            .collect();
        assert_eq!(sources.len(), 64);
        assert_eq!(binaries.len(), 64);

        // No request clobbered another's source
        for (i, ws) in workspaces.iter().enumerate() {
            let content = std::fs::read_to_string(ws.source_path()).unwrap();
            assert_eq!(content, format!("// request {}", i));
        }

        for ws in workspaces {
            ws.cleanup().await;
        }
        assert_eq!(std::fs::read_dir(manager.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_classpath_lists_jars() {
        let (_root, manager) = manager();
        let ws = manager.allocate(Language::Java, "Main.java", None).unwrap();
        std::fs::create_dir_all(ws.lib_dir()).unwrap();
        std::fs::write(ws.lib_dir().join("json-20231013.jar"), b"").unwrap();
        std::fs::write(ws.lib_dir().join("gson-2.10.1.jar"), b"").unwrap();
        std::fs::write(ws.lib_dir().join("README.txt"), b"").unwrap();

        let classpath = ws.classpath();
        let parts: Vec<_> = classpath.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ws.path().to_string_lossy());
        assert!(parts[1].ends_with("gson-2.10.1.jar"));
        assert!(parts[2].ends_with("json-20231013.jar"));
    }

    #[test]
    fn test_classpath_ignores_jars_outside_lib() {
        let (_root, manager) = manager();
        let ws = manager.allocate(Language::Java, "Main.java", None).unwrap();
        std::fs::create_dir_all(ws.lib_dir()).unwrap();
        std::fs::write(ws.lib_dir().join("gson-2.10.1.jar"), b"").unwrap();

        // Build-tool jars such as a Maven repository layout stay off the classpath
        let plugin_dir = ws.deps_dir().join("org/codehaus/plexus/plexus-utils/3.5.1");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("plexus-utils-3.5.1.jar"), b"").unwrap();
        std::fs::write(ws.deps_dir().join("commons-io-2.11.0.jar"), b"").unwrap();
        let nested = ws.lib_dir().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("maven-core-3.9.6.jar"), b"").unwrap();

        let classpath = ws.classpath();
        assert!(classpath.contains("gson-2.10.1.jar"));
        assert!(!classpath.contains("plexus"));
        assert!(!classpath.contains("commons-io"));
        assert!(!classpath.contains("maven-core"));
    }

    #[test]
    fn test_sweep_stale_only_touches_workspaces() {
        let (_root, manager) = manager();
        std::fs::create_dir(manager.root().join("run-leftover")).unwrap();
        std::fs::create_dir(manager.root().join("unrelated")).unwrap();

        assert_eq!(manager.sweep_stale(Duration::ZERO), 1);
        assert!(!manager.root().join("run-leftover").exists());
        assert!(manager.root().join("unrelated").exists());
    }
}
