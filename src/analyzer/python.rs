use std::sync::LazyLock;

use regex::Regex;

use super::{accept, skip, DependencyAnalyzer, DependencySet};
use crate::core::ExecError;
use crate::languages::{Language, LanguageProfile};

/// `import a, b.c as d` (stops at comments and statement separators)
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*import[ \t]+([^\n#;]+)").expect("valid import regex")
});

/// `from a.b import c`
static FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*from[ \t]+(\S+)[ \t]+import\b").expect("valid from-import regex")
});

static MODULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid module regex"));

static PIP_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid pip name regex"));

#[derive(Debug, Clone, Copy)]
enum Quote {
    Single(char),
    Triple(&'static str),
}

/// Source with string literal bodies removed and line breaks kept, so text
/// inside docstrings never reads as an import statement
fn strip_strings(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut quote: Option<Quote> = None;
    let mut i = 0;

    while let Some(c) = source[i..].chars().next() {
        let rest = &source[i..];
        match quote {
            None => {
                if let Some(delim) = ["\"\"\"", "'''"].into_iter().find(|d| rest.starts_with(d)) {
                    quote = Some(Quote::Triple(delim));
                    i += delim.len();
                    continue;
                }
                match c {
                    '"' | '\'' => quote = Some(Quote::Single(c)),
                    '#' => {
                        let end = rest.find('\n').unwrap_or(rest.len());
                        out.push_str(&rest[..end]);
                        i += end;
                        continue;
                    }
                    _ => out.push(c),
                }
            }
            Some(_) if c == '\\' => {
                i += 1;
                if let Some(escaped) = source[i..].chars().next() {
                    if escaped == '\n' {
                        out.push('\n');
                    }
                    i += escaped.len_utf8();
                }
                continue;
            }
            Some(Quote::Triple(delim)) => {
                if rest.starts_with(delim) {
                    quote = None;
                    i += delim.len();
                    continue;
                }
                if c == '\n' {
                    out.push('\n');
                }
            }
            Some(Quote::Single(q)) => {
                if c == '\n' {
                    // Unterminated literal ends at the line break
                    out.push('\n');
                    quote = None;
                } else if c == q {
                    quote = None;
                }
            }
        }
        i += c.len_utf8();
    }

    out
}

#[derive(Debug, Default)]
pub struct PythonAnalyzer;

impl PythonAnalyzer {
    fn add_module(deps: &mut DependencySet, profile: &LanguageProfile, module: &str) {
        // Relative imports never need installing
        if module.is_empty() || module.starts_with('.') {
            return;
        }
        let root = module.split('.').next().unwrap_or(module);
        if !MODULE_RE.is_match(root) {
            skip(Language::Python, root);
            return;
        }
        if profile.is_stdlib(root) {
            return;
        }
        let package = profile.package_for_import(root);
        accept(deps, Language::Python, &package, |name| PIP_NAME_RE.is_match(name));
    }
}

impl DependencyAnalyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    fn analyze(
        &self,
        source: &str,
        profile: &LanguageProfile,
    ) -> Result<DependencySet, ExecError> {
        let code = strip_strings(source);
        let mut deps = DependencySet::new();

        for caps in IMPORT_RE.captures_iter(&code) {
            for item in caps[1].split(',') {
                // "numpy as np" -> "numpy"
                let module = item.split_whitespace().next().unwrap_or("");
                Self::add_module(&mut deps, profile, module);
            }
        }

        for caps in FROM_RE.captures_iter(&code) {
            Self::add_module(&mut deps, profile, &caps[1]);
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
        PythonAnalyzer
            .analyze(source, registry.get(Language::Python))
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn test_stdlib_is_filtered() {
        assert_eq!(detect("import os\nimport requests\n"), vec!["requests"]);
        assert!(detect("import os.path\nimport xml.etree.ElementTree as ET\nfrom __future__ import annotations\n").is_empty());
    }

    #[test]
    fn test_multiple_imports_with_aliases() {
        assert_eq!(
            detect("import numpy as np, pandas as pd\n"),
            vec!["numpy", "pandas"]
        );
    }

    #[test]
    fn test_from_imports_and_package_aliases() {
        assert_eq!(
            detect("from collections import deque\nfrom bs4 import BeautifulSoup\nimport cv2\n"),
            vec!["beautifulsoup4", "opencv-python"]
        );
    }

    #[test]
    fn test_relative_imports_are_skipped() {
        assert!(detect("from . import helpers\nfrom .utils import parse\n").is_empty());
    }

    #[test]
    fn test_indented_imports_and_trailing_comments() {
        assert_eq!(
            detect("def f():\n    import scipy.stats  # lazy\n    return 1\n"),
            vec!["scipy"]
        );
    }

    #[test]
    fn test_commented_and_quoted_imports_are_ignored() {
        assert!(detect("# import flask\nprint('import django')\n").is_empty());
    }

    #[test]
    fn test_docstring_text_is_not_an_import() {
        let src = "\"\"\"Usage:\nimport flask\nfrom django import forms\n\"\"\"\nimport requests\n";
        assert_eq!(detect(src), vec!["requests"]);

        let src = "def f():\n    '''\n    import torch\n    '''\n    return 1\nimport numpy\n";
        assert_eq!(detect(src), vec!["numpy"]);
    }

    #[test]
    fn test_quotes_outside_docstrings_do_not_open_blocks() {
        // '' after 'a' is an empty string, and a quote in a comment is just text
        let src = "x = 'a'''\n# \"\"\" not a docstring\nimport requests\nimport yaml\n";
        assert_eq!(detect(src), vec!["PyYAML", "requests"]);
    }

    #[test]
    fn test_deduplicates() {
        assert_eq!(
            detect("import requests\nfrom requests import get\nimport requests.adapters\n"),
            vec!["requests"]
        );
    }

    #[test]
    fn test_unparseable_names_are_skipped() {
        assert!(detect("import 3d\nimport --upgrade\n").is_empty());
    }
}
