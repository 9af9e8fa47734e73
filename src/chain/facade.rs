//! Chain query facade
//!
//! The capability handed to every derivation. Storage reads are observable:
//! each returns a receiver that yields the current value first and a fresh
//! value whenever the underlying storage changes. Constants and module probes
//! are synchronous lookups against the runtime metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Raw storage value as exported by the chain. Absent storage reads as `null`.
pub type StorageValue = serde_json::Value;

/// Live storage subscription. Ends when the facade drops the query.
pub type QueryStream<T> = mpsc::UnboundedReceiver<Result<T, ChainError>>;

/// Errors surfaced by the chain connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum ChainError {
    #[error("Chain connection closed")]
    Disconnected,

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Address of a storage item or constant: `module.item` or `module.item(key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePath {
    pub module: String,
    pub item: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl StoragePath {
    pub fn new(module: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            item: item.into(),
            key: None,
        }
    }

    /// Entry of a storage map, keyed by the encoded map key
    pub fn keyed(module: impl Into<String>, item: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            item: item.into(),
            key: Some(key.into()),
        }
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}.{}({})", self.module, self.item, key),
            None => write!(f, "{}.{}", self.module, self.item),
        }
    }
}

impl FromStr for StoragePath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, key) = match s.find('(') {
            Some(open) => {
                let key = s[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| format!("unterminated key in storage path: {}", s))?;
                (&s[..open], Some(key.to_string()))
            }
            None => (s, None),
        };

        let (module, item) = head
            .split_once('.')
            .ok_or_else(|| format!("storage path must be module.item: {}", s))?;
        if module.is_empty() || item.is_empty() || item.contains('.') {
            return Err(format!("storage path must be module.item: {}", s));
        }

        Ok(Self {
            module: module.to_string(),
            item: item.to_string(),
            key,
        })
    }
}

/// Read-only access to a chain's storage and runtime metadata
pub trait ChainApi: Send + Sync + 'static {
    /// Subscribe to a single storage item.
    fn query_one(&self, path: &StoragePath) -> QueryStream<StorageValue>;

    /// Subscribe to several storage items at once.
    ///
    /// Combined-latest semantics: the first tuple carries every current value,
    /// then a full tuple is emitted again whenever any constituent changes.
    fn query_multi(&self, paths: &[StoragePath]) -> QueryStream<Vec<StorageValue>>;

    /// Look up a runtime constant.
    fn constant(&self, path: &StoragePath) -> Option<StorageValue>;

    /// Whether the runtime exposes a module under this name.
    fn module_exists(&self, module: &str) -> bool;
}

/// Stable identity of a facade instance, used to key shared subscriptions.
pub fn api_id(api: &Arc<dyn ChainApi>) -> usize {
    Arc::as_ptr(api) as *const () as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_path() {
        let path: StoragePath = "council.members".parse().unwrap();
        assert_eq!(path, StoragePath::new("council", "members"));
        assert_eq!(path.to_string(), "council.members");
    }

    #[test]
    fn test_parse_keyed_path() {
        let path: StoragePath = "council.proposalOf(0x01)".parse().unwrap();
        assert_eq!(path, StoragePath::keyed("council", "proposalOf", "0x01"));
        assert_eq!(path.to_string(), "council.proposalOf(0x01)");
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!("council".parse::<StoragePath>().is_err());
        assert!(".members".parse::<StoragePath>().is_err());
        assert!("council.proposalOf(0x01".parse::<StoragePath>().is_err());
        assert!("a.b.c".parse::<StoragePath>().is_err());
    }
}
