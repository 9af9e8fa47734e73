//! State Loader - Hydrates the sandbox chain from storage exports
//!
//! Exports are either a JSON array or JSONL (one entry per line). Each entry
//! names a storage item or constant by path and carries its JSON value.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::facade::{StoragePath, StorageValue};
use super::sandbox::SandboxChain;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid export entry on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
}

/// Whether an exported entry is a storage value or a runtime constant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    #[default]
    Storage,
    Constant,
}

/// Represents a single entry exported from a chain node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedEntry {
    /// `module.item` or `module.item(key)`
    pub path: String,
    #[serde(default)]
    pub kind: EntryKind,
    pub value: StorageValue,
    /// Block the value was read at
    #[serde(default)]
    pub block: u64,
}

/// Manages loading and caching of exported chain state
#[derive(Default)]
pub struct StateLoader {
    entries: HashMap<(EntryKind, StoragePath), ExportedEntry>,
    modules: HashSet<String>,
    loaded: bool,
}

impl StateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from a JSON/JSONL file.
    /// Auto-detects format based on file extension
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, LoadError> {
        let content = std::fs::read_to_string(path)?;

        let is_jsonl = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));

        if is_jsonl {
            self.load_from_jsonl(&content)
        } else {
            self.load_from_json(&content)
        }
    }

    /// Load state from JSON string (array of ExportedEntry)
    pub fn load_from_json(&mut self, json: &str) -> Result<usize, LoadError> {
        let entries: Vec<ExportedEntry> =
            serde_json::from_str(json).map_err(|source| LoadError::Json { line: 1, source })?;

        let count = entries.len();
        for entry in entries {
            self.insert(entry)?;
        }

        self.loaded = true;
        Ok(count)
    }

    /// Load state from JSONL format (one entry per line)
    ///
    /// When the same path is exported at several blocks, keeps only the value
    /// read at the highest block.
    pub fn load_from_jsonl(&mut self, jsonl: &str) -> Result<usize, LoadError> {
        let mut count = 0;
        for (index, line) in jsonl.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: ExportedEntry = serde_json::from_str(line).map_err(|source| LoadError::Json {
                line: index + 1,
                source,
            })?;
            self.insert(entry)?;
            count += 1;
        }

        self.loaded = true;
        Ok(count)
    }

    fn insert(&mut self, entry: ExportedEntry) -> Result<(), LoadError> {
        let path: StoragePath = entry.path.parse().map_err(LoadError::InvalidPath)?;
        self.modules.insert(path.module.clone());

        let key = (entry.kind, path);
        let should_insert = match self.entries.get(&key) {
            Some(existing) => entry.block >= existing.block,
            None => true,
        };
        if should_insert {
            self.entries.insert(key, entry);
        }
        Ok(())
    }

    /// Declare a module that has no exported entries (e.g. a renamed module
    /// whose storage is empty on this chain).
    pub fn add_module(&mut self, module: impl Into<String>) {
        self.modules.insert(module.into());
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, kind: EntryKind, path: &StoragePath) -> Option<&ExportedEntry> {
        self.entries.get(&(kind, path.clone()))
    }

    /// Get statistics about loaded state
    pub fn stats(&self) -> StateStats {
        let constants = self
            .entries
            .keys()
            .filter(|(kind, _)| *kind == EntryKind::Constant)
            .count();

        StateStats {
            total_entries: self.entries.len(),
            storage_entries: self.entries.len() - constants,
            constant_entries: constants,
            modules: self.modules.len(),
            max_block: self.entries.values().map(|e| e.block).max().unwrap_or(0),
        }
    }

    /// Hydrate a sandbox chain with everything loaded so far
    pub fn into_chain(self) -> SandboxChain {
        let chain = SandboxChain::new();
        for module in self.modules {
            chain.register_module(module);
        }
        for ((kind, path), entry) in self.entries {
            match kind {
                EntryKind::Storage => chain.set_storage(path, entry.value),
                EntryKind::Constant => chain.set_constant(path, entry.value),
            }
        }
        chain
    }
}

/// Statistics about loaded state
#[derive(Debug, Clone, Serialize)]
pub struct StateStats {
    pub total_entries: usize,
    pub storage_entries: usize,
    pub constant_entries: usize,
    pub modules: usize,
    pub max_block: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::facade::ChainApi;
    use serde_json::json;

    #[test]
    fn test_state_loader_default() {
        let loader = StateLoader::new();
        assert!(!loader.is_loaded());
        assert_eq!(loader.entry_count(), 0);
    }

    #[test]
    fn test_load_empty_json() {
        let mut loader = StateLoader::new();
        let result = loader.load_from_json("[]");
        assert_eq!(result.unwrap(), 0);
        assert!(loader.is_loaded());
    }

    #[test]
    fn test_load_jsonl_keeps_highest_block() {
        let mut loader = StateLoader::new();
        let jsonl = r#"
            {"path": "council.members", "value": ["alice"], "block": 10}
            {"path": "council.members", "value": ["alice", "bob"], "block": 12}
            {"path": "council.members", "value": [], "block": 11}
            {"path": "elections.termDuration", "kind": "constant", "value": 100}
        "#;

        assert_eq!(loader.load_from_jsonl(jsonl).unwrap(), 4);
        assert_eq!(loader.entry_count(), 2);

        let members = loader
            .get(EntryKind::Storage, &StoragePath::new("council", "members"))
            .unwrap();
        assert_eq!(members.value, json!(["alice", "bob"]));

        let stats = loader.stats();
        assert_eq!(stats.storage_entries, 1);
        assert_eq!(stats.constant_entries, 1);
        assert_eq!(stats.modules, 2);
        assert_eq!(stats.max_block, 12);
    }

    #[test]
    fn test_load_reports_bad_line() {
        let mut loader = StateLoader::new();
        let jsonl = "{\"path\": \"a.b\", \"value\": 1}\nnot json\n";
        match loader.load_from_jsonl(jsonl) {
            Err(LoadError::Json { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_rejects_bad_path() {
        let mut loader = StateLoader::new();
        let result = loader.load_from_json(r#"[{"path": "members", "value": []}]"#);
        assert!(matches!(result, Err(LoadError::InvalidPath(_))));
    }

    #[test]
    fn test_into_chain() {
        let mut loader = StateLoader::new();
        loader
            .load_from_json(
                r#"[
                    {"path": "council.members", "value": ["alice"]},
                    {"path": "elections.desiredMembers", "kind": "constant", "value": 13}
                ]"#,
            )
            .unwrap();
        loader.add_module("phragmenElection");

        let chain = loader.into_chain();
        assert!(chain.module_exists("council"));
        assert!(chain.module_exists("phragmenElection"));
        assert_eq!(
            chain.constant(&StoragePath::new("elections", "desiredMembers")),
            Some(json!(13))
        );
        assert_eq!(
            chain.storage(&StoragePath::new("council", "members")),
            Some(json!(["alice"]))
        );
    }
}
