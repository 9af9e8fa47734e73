//! In-memory chain backing the sandbox
//!
//! Holds storage values and runtime constants loaded from an export and
//! serves them through [`ChainApi`]. Writes through [`SandboxChain::set_storage`]
//! are pushed to every live query watching the written path.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use super::facade::{ChainApi, ChainError, QueryStream, StoragePath, StorageValue};

enum WatcherSink {
    One(mpsc::UnboundedSender<Result<StorageValue, ChainError>>),
    Multi(mpsc::UnboundedSender<Result<Vec<StorageValue>, ChainError>>),
}

struct Watcher {
    paths: Vec<StoragePath>,
    sink: WatcherSink,
}

impl Watcher {
    fn is_closed(&self) -> bool {
        match &self.sink {
            WatcherSink::One(tx) => tx.is_closed(),
            WatcherSink::Multi(tx) => tx.is_closed(),
        }
    }

    /// Push the current values of every watched path. Returns false once the
    /// receiving side is gone.
    fn notify(&self, storage: &HashMap<StoragePath, StorageValue>) -> bool {
        match &self.sink {
            WatcherSink::One(tx) => tx.send(Ok(read(storage, &self.paths[0]))).is_ok(),
            WatcherSink::Multi(tx) => {
                let values = self.paths.iter().map(|p| read(storage, p)).collect();
                tx.send(Ok(values)).is_ok()
            }
        }
    }

    fn fail(&self, error: ChainError) {
        match &self.sink {
            WatcherSink::One(tx) => {
                let _ = tx.send(Err(error));
            }
            WatcherSink::Multi(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

fn read(storage: &HashMap<StoragePath, StorageValue>, path: &StoragePath) -> StorageValue {
    storage.get(path).cloned().unwrap_or(StorageValue::Null)
}

#[derive(Default)]
struct ChainState {
    storage: HashMap<StoragePath, StorageValue>,
    constants: HashMap<StoragePath, StorageValue>,
    modules: HashSet<String>,
    watchers: Vec<Watcher>,
}

/// In-memory [`ChainApi`] implementation
#[derive(Default)]
pub struct SandboxChain {
    state: Mutex<ChainState>,
    single_queries: AtomicUsize,
    multi_queries: AtomicUsize,
}

impl SandboxChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a module visible to [`ChainApi::module_exists`] without any storage.
    pub fn register_module(&self, module: impl Into<String>) {
        self.state.lock().modules.insert(module.into());
    }

    pub fn set_constant(&self, path: StoragePath, value: StorageValue) {
        let mut state = self.state.lock();
        state.modules.insert(path.module.clone());
        state.constants.insert(path, value);
    }

    /// Write a storage value and push it to every query watching the path.
    pub fn set_storage(&self, path: StoragePath, value: StorageValue) {
        let mut state = self.state.lock();
        state.modules.insert(path.module.clone());
        state.storage.insert(path.clone(), value);

        let ChainState {
            storage, watchers, ..
        } = &mut *state;
        let before = watchers.len();
        watchers.retain(|w| !w.paths.contains(&path) || w.notify(storage));

        tracing::debug!(
            "Storage {} updated, {} queries notified, {} closed",
            path,
            watchers.iter().filter(|w| w.paths.contains(&path)).count(),
            before - watchers.len()
        );
    }

    /// Remove a storage value. Watchers observe `null`.
    pub fn remove_storage(&self, path: &StoragePath) {
        let mut state = self.state.lock();
        if state.storage.remove(path).is_none() {
            return;
        }
        let ChainState {
            storage, watchers, ..
        } = &mut *state;
        watchers.retain(|w| !w.paths.contains(path) || w.notify(storage));
    }

    /// Deliver an error to every live query and drop them.
    pub fn fail_queries(&self, error: ChainError) {
        let watchers = std::mem::take(&mut self.state.lock().watchers);
        tracing::warn!("Failing {} live queries: {}", watchers.len(), error);
        for watcher in &watchers {
            watcher.fail(error.clone());
        }
    }

    /// Drop every live query. Subscribers see their streams end.
    pub fn disconnect(&self) {
        let watchers = std::mem::take(&mut self.state.lock().watchers);
        tracing::info!("Disconnected {} live queries", watchers.len());
    }

    pub fn storage(&self, path: &StoragePath) -> Option<StorageValue> {
        self.state.lock().storage.get(path).cloned()
    }

    /// Get statistics about the chain contents and query traffic
    pub fn stats(&self) -> ChainStats {
        let mut state = self.state.lock();
        state.watchers.retain(|w| !w.is_closed());

        let mut modules: Vec<String> = state.modules.iter().cloned().collect();
        modules.sort();

        ChainStats {
            storage_items: state.storage.len(),
            constants: state.constants.len(),
            modules,
            live_queries: state.watchers.len(),
            single_queries_issued: self.single_queries.load(Ordering::Relaxed),
            multi_queries_issued: self.multi_queries.load(Ordering::Relaxed),
        }
    }
}

impl ChainApi for SandboxChain {
    fn query_one(&self, path: &StoragePath) -> QueryStream<StorageValue> {
        self.single_queries.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher {
            paths: vec![path.clone()],
            sink: WatcherSink::One(tx),
        };

        let mut state = self.state.lock();
        if watcher.notify(&state.storage) {
            state.watchers.push(watcher);
        }
        rx
    }

    fn query_multi(&self, paths: &[StoragePath]) -> QueryStream<Vec<StorageValue>> {
        self.multi_queries.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = Watcher {
            paths: paths.to_vec(),
            sink: WatcherSink::Multi(tx),
        };

        let mut state = self.state.lock();
        if watcher.notify(&state.storage) {
            state.watchers.push(watcher);
        }
        rx
    }

    fn constant(&self, path: &StoragePath) -> Option<StorageValue> {
        self.state.lock().constants.get(path).cloned()
    }

    fn module_exists(&self, module: &str) -> bool {
        self.state.lock().modules.contains(module)
    }
}

/// Statistics about the sandbox chain
#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    pub storage_items: usize,
    pub constants: usize,
    pub modules: Vec<String>,
    pub live_queries: usize,
    pub single_queries_issued: usize,
    pub multi_queries_issued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> StoragePath {
        s.parse().unwrap()
    }

    #[test]
    fn test_modules_registered_from_storage_and_constants() {
        let chain = SandboxChain::new();
        assert!(!chain.module_exists("council"));

        chain.set_storage(path("council.members"), json!([]));
        chain.set_constant(path("elections.termDuration"), json!(100));
        chain.register_module("treasury");

        assert!(chain.module_exists("council"));
        assert!(chain.module_exists("elections"));
        assert!(chain.module_exists("treasury"));
        assert!(!chain.module_exists("phragmenElection"));
        assert_eq!(chain.constant(&path("elections.termDuration")), Some(json!(100)));
    }

    #[tokio::test]
    async fn test_query_multi_emits_initial_then_combined_latest() {
        let chain = SandboxChain::new();
        chain.set_storage(path("a.x"), json!(1));

        let mut rx = chain.query_multi(&[path("a.x"), path("a.y")]);
        assert_eq!(rx.recv().await.unwrap().unwrap(), vec![json!(1), json!(null)]);

        chain.set_storage(path("a.y"), json!(2));
        assert_eq!(rx.recv().await.unwrap().unwrap(), vec![json!(1), json!(2)]);

        chain.set_storage(path("a.x"), json!(3));
        assert_eq!(rx.recv().await.unwrap().unwrap(), vec![json!(3), json!(2)]);

        // unrelated writes do not emit
        chain.set_storage(path("b.z"), json!(0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_query_one_and_remove() {
        let chain = SandboxChain::new();
        chain.set_storage(path("a.x"), json!("v"));

        let mut rx = chain.query_one(&path("a.x"));
        assert_eq!(rx.recv().await.unwrap().unwrap(), json!("v"));

        chain.remove_storage(&path("a.x"));
        assert_eq!(rx.recv().await.unwrap().unwrap(), json!(null));
        assert_eq!(chain.storage(&path("a.x")), None);
    }

    #[tokio::test]
    async fn test_fail_queries_delivers_error_and_ends_stream() {
        let chain = SandboxChain::new();
        let mut rx = chain.query_multi(&[path("a.x")]);
        rx.recv().await.unwrap().unwrap();

        chain.fail_queries(ChainError::Rpc("boom".into()));
        assert_eq!(rx.recv().await.unwrap(), Err(ChainError::Rpc("boom".into())));
        assert!(rx.recv().await.is_none());
        assert_eq!(chain.stats().live_queries, 0);
    }

    #[test]
    fn test_stats_prunes_closed_queries() {
        let chain = SandboxChain::new();
        let rx = chain.query_multi(&[path("a.x")]);
        let _kept = chain.query_one(&path("a.x"));
        drop(rx);

        let stats = chain.stats();
        assert_eq!(stats.live_queries, 1);
        assert_eq!(stats.multi_queries_issued, 1);
        assert_eq!(stats.single_queries_issued, 1);
    }
}
