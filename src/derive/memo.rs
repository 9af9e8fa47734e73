//! Memoization of derivations
//!
//! Calls presenting the same facade and the same serialized arguments share
//! one [`Shared`] handle, so at most one underlying query runs per key.
//! Entries are never evicted on their own: they live until [`Memo::invalidate`]
//! or [`Memo::clear`] removes them, which also disposes the underlying query.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::shared::{DeriveStream, Shared};
use super::DeriveError;
use crate::chain::{api_id, ChainApi};

/// Cache key: facade identity plus serialized call arguments.
///
/// The key holds a weak reference to the facade, which keeps its allocation
/// reserved: a facade created after this one is dropped never gets the same
/// identity while the entry lives.
#[derive(Debug, Clone)]
pub struct MemoKey {
    api: usize,
    facade: Weak<dyn ChainApi>,
    args: String,
}

impl MemoKey {
    /// Key for a call without arguments
    pub fn bare(api: &Arc<dyn ChainApi>) -> Self {
        Self {
            api: api_id(api),
            facade: Arc::downgrade(api),
            args: String::new(),
        }
    }

    pub fn with_args<A: Serialize + ?Sized>(
        api: &Arc<dyn ChainApi>,
        args: &A,
    ) -> Result<Self, DeriveError> {
        let args = serde_json::to_string(args)
            .map_err(|e| DeriveError::InvalidArguments(e.to_string()))?;
        Ok(Self {
            api: api_id(api),
            facade: Arc::downgrade(api),
            args,
        })
    }

    /// Whether the facade this key was built from is still alive
    pub fn is_live(&self) -> bool {
        self.facade.strong_count() > 0
    }
}

impl PartialEq for MemoKey {
    fn eq(&self, other: &Self) -> bool {
        self.api == other.api && self.args == other.args
    }
}

impl Eq for MemoKey {}

impl std::hash::Hash for MemoKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.api.hash(state);
        self.args.hash(state);
    }
}

/// Keyed cache of shared derivation handles
pub struct Memo<T> {
    name: &'static str,
    entries: Mutex<HashMap<MemoKey, Shared<T>>>,
}

impl<T: Send + Sync + 'static> Memo<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the handle cached under `key`, or run `derive` once and cache it.
    pub fn call<F>(&self, key: MemoKey, derive: F) -> Shared<T>
    where
        F: FnOnce() -> DeriveStream<T>,
    {
        let mut entries = self.entries.lock();
        if let Some(shared) = entries.get(&key) {
            tracing::debug!("{}: reusing shared subscription {:?}", self.name, key.args);
            return shared.clone();
        }

        tracing::debug!("{}: starting subscription {:?}", self.name, key.args);
        let shared = Shared::spawn(derive());
        entries.insert(key, shared.clone());
        shared
    }

    /// Cached handle for `key`, if any, without starting a derivation
    pub fn get(&self, key: &MemoKey) -> Option<Shared<T>> {
        self.entries.lock().get(key).cloned()
    }

    /// Drop and dispose every entry whose facade has been dropped.
    /// Returns the number of entries removed.
    pub fn purge_dropped(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, shared| {
            if key.is_live() {
                true
            } else {
                shared.dispose();
                false
            }
        });
        before - entries.len()
    }

    /// Drop and dispose every entry created against `api`.
    /// Returns the number of entries removed.
    pub fn invalidate(&self, api: &Arc<dyn ChainApi>) -> usize {
        let id = api_id(api);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, shared| {
            if key.api == id {
                shared.dispose();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Drop and dispose every entry. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (_, shared) in &drained {
            shared.dispose();
        }
        if !drained.is_empty() {
            tracing::info!("{}: cleared {} cached subscriptions", self.name, drained.len());
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SandboxChain;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn counting_derive(
        calls: &AtomicUsize,
        value: u32,
    ) -> impl FnOnce() -> DeriveStream<u32> + '_ {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(Ok(value)).unwrap();
            // keep the source open so the handle never completes
            std::mem::forget(tx);
            rx
        }
    }

    #[tokio::test]
    async fn test_same_key_shares_one_handle() {
        let api: Arc<dyn ChainApi> = Arc::new(SandboxChain::new());
        let memo = Memo::new("test");
        let calls = AtomicUsize::new(0);

        let a = memo.call(MemoKey::bare(&api), counting_derive(&calls, 1));
        let b = memo.call(MemoKey::bare(&api), counting_derive(&calls, 2));

        assert!(Shared::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*b.first().await.unwrap().unwrap(), 1);
        assert_eq!(memo.len(), 1);
    }

    #[tokio::test]
    async fn test_keys_differ_by_args_and_facade() {
        let api: Arc<dyn ChainApi> = Arc::new(SandboxChain::new());
        let other: Arc<dyn ChainApi> = Arc::new(SandboxChain::new());
        let memo = Memo::new("test");
        let calls = AtomicUsize::new(0);

        let x = memo.call(MemoKey::with_args(&api, "x").unwrap(), counting_derive(&calls, 1));
        let y = memo.call(MemoKey::with_args(&api, "y").unwrap(), counting_derive(&calls, 2));
        let z = memo.call(MemoKey::with_args(&other, "x").unwrap(), counting_derive(&calls, 3));

        assert!(!Shared::ptr_eq(&x, &y));
        assert!(!Shared::ptr_eq(&x, &z));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        assert_eq!(memo.invalidate(&api), 2);
        assert_eq!(memo.len(), 1);
        assert_eq!(memo.clear(), 1);
        assert!(memo.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_facade_identity_not_reused() {
        let memo = Memo::new("test");
        let calls = AtomicUsize::new(0);

        let api: Arc<dyn ChainApi> = Arc::new(SandboxChain::new());
        let stale = MemoKey::bare(&api);
        memo.call(stale.clone(), counting_derive(&calls, 1));
        drop(api);
        assert!(!stale.is_live());

        for n in 0..8 {
            let api: Arc<dyn ChainApi> = Arc::new(SandboxChain::new());
            let key = MemoKey::bare(&api);
            assert_ne!(key, stale);
            assert!(memo.get(&key).is_none());
            memo.call(key, counting_derive(&calls, n));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 9);

        // every facade above has been dropped
        assert_eq!(memo.purge_dropped(), 9);
        assert!(memo.is_empty());
    }

    #[tokio::test]
    async fn test_clear_forces_fresh_derivation() {
        let api: Arc<dyn ChainApi> = Arc::new(SandboxChain::new());
        let memo = Memo::new("test");
        let calls = AtomicUsize::new(0);

        let before = memo.call(MemoKey::bare(&api), counting_derive(&calls, 1));
        memo.clear();
        let after = memo.call(MemoKey::bare(&api), counting_derive(&calls, 2));

        assert!(!Shared::ptr_eq(&before, &after));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*after.first().await.unwrap().unwrap(), 2);
    }
}
