//! Language profiles for dependency detection, compilation and execution
//!
//! Profiles are read once at startup from `files/languages.toml` (embedded
//! into the binary, or an override file) and shared read-only afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

const EMBEDDED_LANGUAGES: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));

const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 5;

/// The five supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Java,
    C,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::JavaScript,
        Language::Java,
        Language::C,
        Language::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }

    fn index(&self) -> usize {
        match self {
            Language::Python => 0,
            Language::JavaScript => 1,
            Language::Java => 2,
            Language::C => 3,
            Language::Cpp => 4,
        }
    }

    /// Standard-library allowlist shipped with the binary
    fn stdlib_data(&self) -> &'static str {
        match self {
            Language::Python => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/files/stdlib/python.txt"
            )),
            Language::JavaScript => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/files/stdlib/javascript.txt"
            )),
            Language::Java => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/files/stdlib/java.txt"
            )),
            Language::C => {
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/stdlib/c.txt"))
            }
            Language::Cpp => include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/files/stdlib/cpp.txt"
            )),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unsupported language: {}", s))
    }
}

/// Immutable configuration for one language
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub language: Language,
    /// Source file name template (e.g. "main.py", "{class}.java")
    pub source_file: String,
    /// Compiled artifact name, compiled-to-native languages only
    pub binary_file: Option<String>,
    /// Package manager argv template (None: nothing to install with)
    pub install_command: Option<Vec<String>>,
    /// Compile argv template (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run argv template
    pub run_command: Vec<String>,
    /// Extra environment for the run and compile stages
    pub run_env: Vec<(String, String)>,
    pub install_timeout: Duration,
    /// The package manager keeps state outside the request (e.g. Maven's
    /// plugin cache), so installs for this language run one at a time
    pub shared_install_cache: bool,
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    /// Modules, packages or headers available without installation
    pub stdlib: HashSet<String>,
    /// Import name -> registry package name
    pub package_aliases: HashMap<String, String>,
    /// Java package prefix -> Maven coordinates
    pub artifacts: BTreeMap<String, String>,
}

impl LanguageProfile {
    pub fn is_compiled(&self) -> bool {
        self.compile_command.is_some()
    }

    pub fn is_stdlib(&self, name: &str) -> bool {
        self.stdlib.contains(name)
    }

    /// Registry package that provides an imported module
    pub fn package_for_import(&self, module: &str) -> String {
        self.package_aliases
            .get(module)
            .cloned()
            .unwrap_or_else(|| module.to_string())
    }

    /// Maven coordinates for a java package, matched on the longest prefix
    pub fn artifact_for(&self, package: &str) -> Option<&str> {
        self.artifacts
            .iter()
            .filter(|(prefix, _)| {
                package == prefix.as_str()
                    || package
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, coordinates)| coordinates.as_str())
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLanguageProfile {
    source_file: String,
    binary_file: Option<String>,
    install_command: Option<Vec<String>>,
    compile_command: Option<Vec<String>>,
    run_command: Vec<String>,
    #[serde(default)]
    run_env: BTreeMap<String, String>,
    install_timeout_secs: Option<u64>,
    #[serde(default)]
    shared_install_cache: bool,
    compile_timeout_secs: Option<u64>,
    run_timeout_secs: Option<u64>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    extra_stdlib: Vec<String>,
    #[serde(default)]
    package_aliases: HashMap<String, String>,
    #[serde(default)]
    artifacts: BTreeMap<String, String>,
}

/// All language profiles, one per supported language
#[derive(Debug)]
pub struct LanguageRegistry {
    /// Indexed by `Language::index`
    profiles: Vec<LanguageProfile>,
    aliases: HashMap<String, Language>,
}

impl LanguageRegistry {
    /// Profiles compiled into the binary
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_toml(EMBEDDED_LANGUAGES)
    }

    /// Load from an override file, falling back to the embedded profiles
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Invalid language config {}", path.display()))
            }
            None => Self::embedded(),
        }
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageProfile> = toml::from_str(content)?;

        let mut parsed: HashMap<Language, LanguageProfile> = HashMap::new();
        let mut aliases = HashMap::new();

        for (name, raw) in raw_configs {
            let language: Language = name.parse().map_err(anyhow::Error::msg)?;
            validate_raw(language, &raw)?;

            for alias in &raw.aliases {
                aliases.insert(alias.to_lowercase(), language);
            }

            let mut stdlib = parse_allowlist(language.stdlib_data());
            stdlib.extend(raw.extra_stdlib);

            let profile = LanguageProfile {
                language,
                source_file: raw.source_file,
                binary_file: raw.binary_file,
                install_command: raw.install_command,
                compile_command: raw.compile_command,
                run_command: raw.run_command,
                run_env: raw.run_env.into_iter().collect(),
                install_timeout: Duration::from_secs(
                    raw.install_timeout_secs
                        .unwrap_or(DEFAULT_INSTALL_TIMEOUT_SECS),
                ),
                shared_install_cache: raw.shared_install_cache,
                compile_timeout: Duration::from_secs(
                    raw.compile_timeout_secs
                        .unwrap_or(DEFAULT_COMPILE_TIMEOUT_SECS),
                ),
                run_timeout: Duration::from_secs(
                    raw.run_timeout_secs.unwrap_or(DEFAULT_RUN_TIMEOUT_SECS),
                ),
                stdlib,
                package_aliases: raw.package_aliases,
                artifacts: raw.artifacts,
            };

            parsed.insert(language, profile);
        }

        let mut profiles = Vec::with_capacity(Language::ALL.len());
        for language in Language::ALL {
            let profile = parsed
                .remove(&language)
                .ok_or_else(|| anyhow::anyhow!("Missing profile for language {}", language))?;
            profiles.push(profile);
        }

        Ok(Self { profiles, aliases })
    }

    /// Profile for a supported language; present by construction
    pub fn get(&self, language: Language) -> &LanguageProfile {
        &self.profiles[language.index()]
    }

    /// Resolve a canonical name or alias, rejecting anything else
    pub fn resolve(&self, name: &str) -> Option<Language> {
        let name = name.trim();
        name.parse::<Language>()
            .ok()
            .or_else(|| self.aliases.get(&name.to_lowercase()).copied())
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.iter()
    }
}

fn validate_raw(language: Language, raw: &RawLanguageProfile) -> anyhow::Result<()> {
    if raw.run_command.is_empty() {
        anyhow::bail!("Empty run_command for {}", language);
    }
    if raw.compile_command.as_ref().is_some_and(|cmd| cmd.is_empty()) {
        anyhow::bail!("Empty compile_command for {}", language);
    }
    if raw.install_command.as_ref().is_some_and(|cmd| cmd.is_empty()) {
        anyhow::bail!("Empty install_command for {}", language);
    }
    if language == Language::Java && !raw.source_file.contains("{class}") {
        anyhow::bail!("Java source_file must be named after {{class}}");
    }
    let uses_binary = raw
        .compile_command
        .iter()
        .chain(std::iter::once(&raw.run_command))
        .flatten()
        .any(|arg| arg.contains("{binary}"));
    if uses_binary && raw.binary_file.is_none() {
        anyhow::bail!("{} uses {{binary}} but has no binary_file", language);
    }
    Ok(())
}

fn parse_allowlist(data: &str) -> HashSet<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}
