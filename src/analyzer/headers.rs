use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{DependencyAnalyzer, DependencySet};
use crate::core::utils::strip_c_comments;
use crate::core::ExecError;
use crate::languages::{Language, LanguageProfile};

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*#[ \t]*include[ \t]*<[ \t]*([^>\s]+)[ \t]*>").expect("valid include regex")
});

/// C and C++ have no package manager here: any system header outside the
/// allowlist rejects the program before compilation.
#[derive(Debug)]
pub struct HeaderAnalyzer {
    language: Language,
}

impl HeaderAnalyzer {
    pub const fn new(language: Language) -> Self {
        Self { language }
    }
}

/// "curl/curl.h" -> "curl", "gmp.h" -> "gmp.h"
fn header_root(header: &str) -> &str {
    header.split('/').next().unwrap_or(header)
}

impl DependencyAnalyzer for HeaderAnalyzer {
    fn language(&self) -> Language {
        self.language
    }

    fn analyze(
        &self,
        source: &str,
        profile: &LanguageProfile,
    ) -> Result<DependencySet, ExecError> {
        let code = strip_c_comments(source);

        let unsupported: BTreeSet<String> = INCLUDE_RE
            .captures_iter(&code)
            .map(|caps| caps[1].to_string())
            .filter(|header| !profile.is_stdlib(header))
            .map(|header| header_root(&header).to_string())
            .collect();

        if !unsupported.is_empty() {
            debug!("Rejecting {} source with headers {:?}", self.language, unsupported);
            return Err(ExecError::UnsupportedHeader(unsupported.into_iter().collect()));
        }

        Ok(DependencySet::new())
    }
}
