use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Upstream id used when a requested model has no alias entry.
pub const DEFAULT_UPSTREAM_MODEL: &str = "ep-20250218144306-sshj5";

const REFERENCE_ALIASES: [(&str, &str); 4] = [
    ("deepseek-r1", "ep-20250218144306-sshj5"),
    ("deepseek-v3", "ep-20250218170310-pvmdb"),
    ("deepseek-r1-distill-qwen-7b", "ep-20250218182157-7rdv4"),
    ("deepseek-r1-distill-qwen-32b", "ep-20250218182233-vxkqv"),
];

/// Public model name -> upstream model id, with a fallback for unknown names.
///
/// Loaded once at startup and read concurrently by every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAliasTable {
    entries: BTreeMap<String, String>,
    default: String,
}

impl ModelAliasTable {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            entries: BTreeMap::new(),
            default: default.into(),
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    pub fn insert(&mut self, alias: impl Into<String>, upstream_id: impl Into<String>) {
        self.entries.insert(alias.into(), upstream_id.into());
    }

    /// Never fails: names without an entry map to the default upstream id.
    pub fn resolve(&self, name: &str) -> &str {
        self.entries
            .get(name)
            .map(String::as_str)
            .unwrap_or(self.default.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn default_model(&self) -> &str {
        &self.default
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses one `alias=upstream_id` pair.
    pub fn parse_entry(raw: &str) -> Result<(String, String), ConfigError> {
        let (alias, upstream_id) = raw
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidAliasEntry(raw.to_string()))?;
        let alias = alias.trim();
        let upstream_id = upstream_id.trim();
        if alias.is_empty() || upstream_id.is_empty() {
            return Err(ConfigError::InvalidAliasEntry(raw.to_string()));
        }
        Ok((alias.to_string(), upstream_id.to_string()))
    }
}

impl Default for ModelAliasTable {
    fn default() -> Self {
        let mut table = Self::new(DEFAULT_UPSTREAM_MODEL);
        for (alias, upstream_id) in REFERENCE_ALIASES {
            table.insert(alias, upstream_id);
        }
        table
    }
}
