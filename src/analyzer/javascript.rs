use std::sync::LazyLock;

use regex::Regex;

use super::{accept, DependencyAnalyzer, DependencySet};
use crate::core::utils::strip_c_comments;
use crate::core::ExecError;
use crate::languages::{Language, LanguageProfile};

/// `require('x')`, `import('x')`, `import 'x'` and `import ... from 'x'` /
/// `export ... from 'x'` (the `from` clause may span lines)
static SPECIFIER_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"\brequire\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#,
        r#"\bimport\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#,
        r#"(?m)^\s*import\s*['"]([^'"\n]+)['"]"#,
        r#"\b(?:import|export)\s[^'";]*?\bfrom\s*['"]([^'"\n]+)['"]"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid specifier regex"))
    .collect()
});

static NPM_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$").expect("valid npm name regex")
});

#[derive(Debug, Default)]
pub struct JavaScriptAnalyzer;

/// Package that owns a module specifier, or None for files and builtins
fn package_name(specifier: &str) -> Option<&str> {
    if specifier.starts_with('.') || specifier.starts_with('/') || specifier.starts_with("node:") {
        return None;
    }

    if specifier.starts_with('@') {
        // "@scope/name/sub/path" -> "@scope/name"
        let mut slashes = specifier.match_indices('/').map(|(i, _)| i);
        let _scope_end = slashes.next()?;
        return Some(match slashes.next() {
            Some(end) => &specifier[..end],
            None => specifier,
        });
    }

    Some(specifier.split('/').next().unwrap_or(specifier))
}

impl DependencyAnalyzer for JavaScriptAnalyzer {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn analyze(
        &self,
        source: &str,
        profile: &LanguageProfile,
    ) -> Result<DependencySet, ExecError> {
        let code = strip_c_comments(source);
        let mut deps = DependencySet::new();

        for re in SPECIFIER_RES.iter() {
            for caps in re.captures_iter(&code) {
                let Some(package) = package_name(caps[1].trim()) else {
                    continue;
                };
                if profile.is_stdlib(package) {
                    continue;
                }
                accept(&mut deps, Language::JavaScript, package, |name| {
                    NPM_NAME_RE.is_match(name)
                });
            }
        }

        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageRegistry;

    fn detect(source: &str) -> Vec<String> {
        let registry = LanguageRegistry::embedded().unwrap();
        JavaScriptAnalyzer
            .analyze(source, registry.get(Language::JavaScript))
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn test_require_and_builtins() {
        assert_eq!(
            detect("const fs = require('fs');\nconst _ = require(\"lodash\");\n"),
            vec!["lodash"]
        );
    }

    #[test]
    fn test_es_module_forms() {
        let src = r#"
import express from 'express';
import { readFile } from "node:fs/promises";
import {
  parse,
  format,
} from 'date-fns';
import 'dotenv/config';
export { default as chalk } from 'chalk';
const lazy = await import('axios');
"#;
        assert_eq!(
            detect(src),
            vec!["axios", "chalk", "date-fns", "dotenv", "express"]
        );
    }

    #[test]
    fn test_scoped_and_subpath_packages() {
        assert_eq!(
            detect("const x = require('@babel/core/lib/index');\nconst y = require('lodash/fp');\n"),
            vec!["@babel/core", "lodash"]
        );
    }

    #[test]
    fn test_relative_paths_and_comments_are_skipped() {
        let src = "const a = require('./a');\nconst b = require('../b');\n// const c = require('moment');\n/* import x from 'react' */\n";
        assert!(detect(src).is_empty());
    }

    #[test]
    fn test_core_submodules_are_builtin() {
        assert!(detect("const { promisify } = require('util');\nconst p = require('fs/promises');\n").is_empty());
    }

    #[test]
    fn test_invalid_names_are_skipped() {
        assert!(detect("require('--registry=http://evil');\nrequire('Upper');\n").is_empty());
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("@scope/pkg"), Some("@scope/pkg"));
        assert_eq!(package_name("@scope"), None);
        assert_eq!(package_name("node:path"), None);
        assert_eq!(package_name("/abs/file.js"), None);
    }
}
