//! Placeholder value sources: the template config mapping and the environment

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Values in `template_cfg.json` can be strings, booleans, or numbers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Other(serde_json::Value),
}

impl ConfigValue {
    /// String form used for substitution, `None` for null/nested values
    pub fn as_text(&self) -> Option<String> {
        match self {
            ConfigValue::String(s) => Some(s.clone()),
            ConfigValue::Bool(b) => Some(b.to_string()),
            ConfigValue::Int(i) => Some(i.to_string()),
            ConfigValue::Float(f) => Some(f.to_string()),
            ConfigValue::Other(_) => None,
        }
    }
}

/// Placeholder key → value mapping, loaded once per expansion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMapping {
    values: HashMap<String, String>,
}

impl ConfigMapping {
    /// Load the mapping from a JSON object file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&contents)
    }

    /// Parse the mapping from a JSON object
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let raw: HashMap<String, ConfigValue> = serde_json::from_str(json)?;

        let mut values = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            match value.as_text() {
                Some(text) => {
                    values.insert(key, text);
                }
                None => log::warn!("Config variable '{}' is not a scalar, ignoring it", key),
            }
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ConfigMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Why a placeholder kept its literal token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// Key absent from the mapping and no environment fallback
    MissingKey,
    /// Key present in the mapping with an empty value
    EmptyValue,
    /// Key absent from the mapping and the environment variable is unset or empty
    MissingEnv,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::MissingKey => write!(f, "config variable not found"),
            UnresolvedReason::EmptyValue => write!(f, "config variable is empty"),
            UnresolvedReason::MissingEnv => write!(f, "environment variable not found"),
        }
    }
}

/// Outcome of resolving one placeholder key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Value(String),
    Unresolved(UnresolvedReason),
}

/// Anything that can resolve a placeholder key
pub trait ValueSource {
    fn resolve(&self, key: &str) -> Resolution;
}

/// Layered lookup: config mapping first, then (optionally) the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    mapping: ConfigMapping,
    env_fallback: bool,
    /// Consulted before the process environment
    env_overrides: HashMap<String, String>,
}

impl ConfigSource {
    pub fn new(mapping: ConfigMapping, env_fallback: bool) -> Self {
        Self {
            mapping,
            env_fallback,
            env_overrides: HashMap::new(),
        }
    }

    /// Add an environment value without touching the process environment
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(name.into(), value.into());
        self
    }

    fn lookup_env(&self, name: &str) -> Option<String> {
        if let Some(value) = self.env_overrides.get(name) {
            return Some(value.clone());
        }
        std::env::var(name).ok()
    }
}

impl ValueSource for ConfigSource {
    fn resolve(&self, key: &str) -> Resolution {
        match self.mapping.get(key) {
            Some(value) if !value.is_empty() => Resolution::Value(value.to_string()),
            Some(_) => Resolution::Unresolved(UnresolvedReason::EmptyValue),
            None if self.env_fallback => match self.lookup_env(key) {
                Some(value) if !value.is_empty() => Resolution::Value(value),
                _ => Resolution::Unresolved(UnresolvedReason::MissingEnv),
            },
            None => Resolution::Unresolved(UnresolvedReason::MissingKey),
        }
    }
}

/// Errors loading the config mapping
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
