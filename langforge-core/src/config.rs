//! Language definition files.
//!
//! A language is described by one JSON document: its grammar as a rule
//! map, the keywords it reserves, which rules play which structural role,
//! and the protocols its programs can be checked against.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::CoreError;
use crate::grammar_parser::RuleMap;
use crate::protocol::Protocol;
use crate::shape::Role;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default = "default_true")]
    pub skip_whitespace: bool,
    #[serde(default)]
    pub comments: Vec<String>,
    pub rules: BTreeMap<String, String>,
}

impl GrammarConfig {
    pub fn to_rule_map(&self) -> RuleMap {
        RuleMap {
            rules: self.rules.clone(),
            start: self.start.clone(),
            skip_whitespace: self.skip_whitespace,
            comments: self.comments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    /// File extensions without the leading dot.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub grammar: GrammarConfig,
    /// Rule name to role, on top of the built-in aliases.
    #[serde(default)]
    pub constructs: BTreeMap<String, Role>,
    #[serde(default)]
    pub protocols: Vec<Protocol>,
}

impl LanguageConfig {
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn handles_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        self.extensions.iter().any(|known| known == extension)
    }
}

/// Directory holding the language definitions shipped with the workspace.
pub fn default_language_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../languages")
}

/// Every language definition found under a directory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    languages: BTreeMap<String, LanguageConfig>,
    paths: BTreeMap<String, PathBuf>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all `*.json` files below `root`, recursively. When two files
    /// declare the same name the one visited last wins.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, CoreError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(CoreError::MissingLanguageRoot(root.to_path_buf()));
        }
        let mut registry = LanguageRegistry::new();
        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !path.is_file() || !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let config = LanguageConfig::load(path)?;
            debug!(language = %config.name, path = %path.display(), "loaded language definition");
            if registry.paths.contains_key(&config.name) {
                warn!(language = %config.name, path = %path.display(), "language defined more than once");
            }
            registry.paths.insert(config.name.clone(), path.to_path_buf());
            registry.insert(config);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, config: LanguageConfig) {
        self.languages.insert(config.name.clone(), config);
    }

    pub fn get(&self, name: &str) -> Result<&LanguageConfig, CoreError> {
        self.languages
            .get(name)
            .ok_or_else(|| CoreError::UnknownLanguage(name.to_string()))
    }

    pub fn for_extension(&self, extension: &str) -> Option<&LanguageConfig> {
        self.languages
            .values()
            .find(|config| config.handles_extension(extension))
    }

    /// File a language was loaded from, if it came from disk.
    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}
