use std::sync::LazyLock;

use regex::Regex;

use super::{accept, DependencyAnalyzer, DependencySet};
use crate::core::utils::strip_c_comments;
use crate::core::ExecError;
use crate::languages::{Language, LanguageProfile};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*import\s+(static\s+)?([A-Za-z_$][\w$]*(?:\s*\.\s*[A-Za-z_$][\w$]*)*)(\s*\.\s*\*)?\s*;")
        .expect("valid java import regex")
});

static PUBLIC_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpublic\s+(?:(?:final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][\w$]*)")
        .expect("valid public class regex")
});

static PACKAGE_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*package\s+([A-Za-z_$][\w$.\s]*?)\s*;").expect("valid package declaration regex")
});

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid package regex")
});

#[derive(Debug, Default)]
pub struct JavaAnalyzer;

/// Package part of an import: segments before the first capitalised one
/// (the class). Wildcard imports already name a package.
fn import_package(path: &str, is_static: bool, wildcard: bool) -> String {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();

    if wildcard && !is_static {
        return segments.join(".");
    }

    match segments
        .iter()
        .position(|s| s.chars().next().is_some_and(char::is_uppercase))
    {
        Some(0) => String::new(),
        Some(class_at) => segments[..class_at].join("."),
        None if segments.len() > 1 => segments[..segments.len() - 1].join("."),
        None => segments.join("."),
    }
}

fn is_jdk_package(profile: &LanguageProfile, package: &str) -> bool {
    profile.stdlib.iter().any(|prefix| {
        package == prefix
            || package
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

impl DependencyAnalyzer for JavaAnalyzer {
    fn language(&self) -> Language {
        Language::Java
    }

    fn analyze(
        &self,
        source: &str,
        profile: &LanguageProfile,
    ) -> Result<DependencySet, ExecError> {
        let code = strip_c_comments(source);
        let mut deps = DependencySet::new();

        for caps in IMPORT_RE.captures_iter(&code) {
            let is_static = caps.get(1).is_some();
            let wildcard = caps.get(3).is_some();
            let package = import_package(&caps[2], is_static, wildcard);

            if package.is_empty() || is_jdk_package(profile, &package) {
                continue;
            }
            accept(&mut deps, Language::Java, &package, |name| {
                PACKAGE_RE.is_match(name)
            });
        }

        Ok(deps)
    }
}

/// The single top-level public class of a java source file.
///
/// javac requires the file to be named after it, so the engine calls this
/// before anything is written to disk. Nested public classes are ignored.
/// Classes are run from the workspace root, so a `package` declaration is
/// rejected too.
pub fn public_class_name(source: &str) -> Result<String, ExecError> {
    let code = strip_c_comments(source);

    if let Some(caps) = PACKAGE_DECL_RE.captures(&code) {
        return Err(ExecError::Validation(format!(
            "Compilation Error: package declarations are not supported. Remove `package {};`.",
            caps[1].trim()
        )));
    }

    let depths = brace_depths(&code);

    let top_level: Vec<String> = PUBLIC_CLASS_RE
        .captures_iter(&code)
        .filter(|caps| caps.get(0).is_some_and(|m| depths.get(m.start()) == Some(&0)))
        .map(|caps| caps[1].to_string())
        .collect();

    match top_level.as_slice() {
        [name] => Ok(name.clone()),
        [] => Err(ExecError::Validation(
            "Compilation Error: no public class found. Declare exactly one `public class`."
                .to_string(),
        )),
        names => Err(ExecError::Validation(format!(
            "Compilation Error: multiple public classes ({}). Declare exactly one `public class`.",
            names.join(", ")
        ))),
    }
}

/// Brace nesting depth at every byte offset, ignoring string and char literals
fn brace_depths(code: &str) -> Vec<usize> {
    let mut depths = Vec::with_capacity(code.len());
    let mut depth: usize = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in code.chars() {
        for _ in 0..c.len_utf8() {
            depths.push(depth);
        }
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q || c == '\n' => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            },
        }
    }

    depths
}
