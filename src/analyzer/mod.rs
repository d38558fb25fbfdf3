//! Dependency analysis - static import scanning
//!
//! Each language has a `DependencyAnalyzer` that scans source text for
//! imports and subtracts the profile's standard-library allowlist. The scan
//! is best-effort: names that cannot be isolated cleanly are skipped with a
//! warning instead of failing the request.

mod headers;
mod java;
mod javascript;
mod python;

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::core::ExecError;
use crate::languages::{Language, LanguageProfile};

pub use headers::HeaderAnalyzer;
pub use java::{public_class_name, JavaAnalyzer};
pub use javascript::JavaScriptAnalyzer;
pub use python::PythonAnalyzer;

/// Deduplicated, ordered set of packages to install
pub type DependencySet = BTreeSet<String>;

/// Language-specific import scanner
pub trait DependencyAnalyzer: Send + Sync {
    fn language(&self) -> Language;

    /// Packages the source needs beyond the standard library
    fn analyze(&self, source: &str, profile: &LanguageProfile)
        -> Result<DependencySet, ExecError>;
}

static PYTHON: PythonAnalyzer = PythonAnalyzer;
static JAVASCRIPT: JavaScriptAnalyzer = JavaScriptAnalyzer;
static JAVA: JavaAnalyzer = JavaAnalyzer;
static C_HEADERS: HeaderAnalyzer = HeaderAnalyzer::new(Language::C);
static CPP_HEADERS: HeaderAnalyzer = HeaderAnalyzer::new(Language::Cpp);

pub fn analyzer_for(language: Language) -> &'static dyn DependencyAnalyzer {
    match language {
        Language::Python => &PYTHON,
        Language::JavaScript => &JAVASCRIPT,
        Language::Java => &JAVA,
        Language::C => &C_HEADERS,
        Language::Cpp => &CPP_HEADERS,
    }
}

/// Detect the third-party dependencies of a program
pub fn detect_dependencies(
    profile: &LanguageProfile,
    source: &str,
) -> Result<DependencySet, ExecError> {
    let analyzer = analyzer_for(profile.language);
    let deps = analyzer.analyze(source, profile)?;
    debug!("Detected {} dependencies for {}: {:?}", deps.len(), analyzer.language(), deps);
    Ok(deps)
}

/// Add a candidate package, skipping names that fail `is_valid`
fn accept(
    deps: &mut DependencySet,
    language: Language,
    name: &str,
    is_valid: impl Fn(&str) -> bool,
) {
    if is_valid(name) {
        deps.insert(name.to_string());
    } else {
        skip(language, name);
    }
}

fn skip(language: Language, name: &str) {
    warn!(%language, package = name, "skipping import that is not a valid package name");
}
