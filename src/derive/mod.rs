//! Derived chain views
//!
//! Derivations combine several storage reads into one denormalized view
//! model and emit a fresh snapshot whenever any of the reads changes.
//! [`ChainDerive`] binds them to a facade and memoizes each one so repeated
//! calls share a single live subscription.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::chain::{AccountId, ChainApi, ChainError, Hash, StoragePath, StorageValue};

pub mod council;
pub mod elections;
pub mod memo;
pub mod shape;
pub mod shared;

pub use council::{CollectiveProposal, Votes};
pub use elections::ElectionsInfo;
pub use memo::{Memo, MemoKey};
pub use shared::{DeriveStream, Shared, Subscriber};

/// Errors delivered on a derivation stream. All of them end the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeriveError {
    #[error("None of the modules {candidates:?} exist on this chain")]
    ModuleNotFound { candidates: Vec<String> },

    #[error("Missing constant {0}")]
    MissingConstant(String),

    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("Invalid derive arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Query(#[from] ChainError),
}

/// Pick the first module name the chain exposes. Runtime modules get renamed
/// across protocol versions, so callers list the names newest first.
pub fn resolve_module(api: &dyn ChainApi, candidates: &[&'static str]) -> Result<&'static str, DeriveError> {
    let module = candidates
        .iter()
        .copied()
        .find(|name| api.module_exists(name))
        .ok_or_else(|| DeriveError::ModuleNotFound {
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
        })?;
    tracing::debug!("Resolved module {} from {:?}", module, candidates);
    Ok(module)
}

/// Decode a storage value. `null` (absent storage) decodes to the default.
pub(crate) fn decode<T: DeserializeOwned + Default>(
    path: &StoragePath,
    value: StorageValue,
) -> Result<T, DeriveError> {
    if value.is_null() {
        return Ok(T::default());
    }
    decode_value(path, value)
}

pub(crate) fn decode_value<T: DeserializeOwned>(
    path: &StoragePath,
    value: StorageValue,
) -> Result<T, DeriveError> {
    serde_json::from_value(value).map_err(|e| DeriveError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Optional runtime constant; absent in some protocol versions.
pub(crate) fn optional_constant<T: DeserializeOwned>(
    api: &dyn ChainApi,
    path: &StoragePath,
) -> Result<Option<T>, DeriveError> {
    match api.constant(path) {
        Some(value) if !value.is_null() => decode_value(path, value).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn required_constant<T: DeserializeOwned>(
    api: &dyn ChainApi,
    path: &StoragePath,
) -> Result<T, DeriveError> {
    optional_constant(api, path)?.ok_or_else(|| DeriveError::MissingConstant(path.to_string()))
}

/// Stream that fails immediately, for errors found before any query is issued
pub(crate) fn failed<T>(error: DeriveError) -> DeriveStream<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Err(error));
    rx
}

/// Forward every emission of `source` through `map` until either side closes
/// or `map` fails.
pub(crate) fn map_query<S, T, F>(
    mut source: mpsc::UnboundedReceiver<Result<S, ChainError>>,
    mut map: F,
) -> DeriveStream<T>
where
    S: Send + 'static,
    T: Send + 'static,
    F: FnMut(S) -> Result<T, DeriveError> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                item = source.recv() => {
                    let Some(item) = item else { break };
                    let result = item.map_err(DeriveError::from).and_then(&mut map);
                    let fatal = result.is_err();
                    if tx.send(result).is_err() || fatal {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Memoized derivations bound to one chain facade
pub struct ChainDerive {
    api: Arc<dyn ChainApi>,
    elections_info: Memo<ElectionsInfo>,
    council_members: Memo<Vec<AccountId>>,
    council_proposal: Memo<Option<CollectiveProposal>>,
    council_proposals: Memo<Vec<CollectiveProposal>>,
}

impl ChainDerive {
    pub fn new(api: Arc<dyn ChainApi>) -> Self {
        Self {
            api,
            elections_info: Memo::new("elections.info"),
            council_members: Memo::new("council.members"),
            council_proposal: Memo::new("council.proposal"),
            council_proposals: Memo::new("council.proposals"),
        }
    }

    /// Combined election state: candidates, members, runners-up and module constants
    pub fn elections_info(&self) -> Shared<ElectionsInfo> {
        let api = self.api.clone();
        self.elections_info
            .call(MemoKey::bare(&self.api), move || elections::info(api))
    }

    pub fn council_members(&self) -> Shared<Vec<AccountId>> {
        let api = self.api.clone();
        self.council_members
            .call(MemoKey::bare(&self.api), move || council::members(api))
    }

    /// A single collective proposal with its current votes
    pub fn council_proposal(&self, hash: Hash) -> Result<Shared<Option<CollectiveProposal>>, DeriveError> {
        let key = MemoKey::with_args(&self.api, &hash)?;
        let api = self.api.clone();
        Ok(self
            .council_proposal
            .call(key, move || council::proposal(api, hash)))
    }

    /// One-shot read of a proposal. Reuses a cached subscription when one
    /// exists, otherwise queries once without caching anything.
    pub async fn council_proposal_snapshot(
        &self,
        hash: Hash,
    ) -> Result<Option<CollectiveProposal>, DeriveError> {
        let key = MemoKey::with_args(&self.api, &hash)?;
        if let Some(shared) = self.council_proposal.get(&key) {
            return match shared.first().await {
                Some(Ok(proposal)) => Ok((*proposal).clone()),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            };
        }

        let mut stream = council::proposal(self.api.clone(), hash);
        stream.recv().await.unwrap_or(Ok(None))
    }

    /// Every open collective proposal, in storage order
    pub fn council_proposals(&self) -> Shared<Vec<CollectiveProposal>> {
        let api = self.api.clone();
        self.council_proposals
            .call(MemoKey::bare(&self.api), move || council::proposals(api))
    }

    /// Dispose every cached subscription. The next call of each derivation
    /// issues fresh queries. Returns the number of entries dropped.
    pub fn clear_cache(&self) -> usize {
        self.elections_info.invalidate(&self.api)
            + self.council_members.invalidate(&self.api)
            + self.council_proposal.invalidate(&self.api)
            + self.council_proposals.invalidate(&self.api)
    }

    /// Number of live cached subscriptions across all derivations
    pub fn cached_subscriptions(&self) -> usize {
        self.elections_info.len()
            + self.council_members.len()
            + self.council_proposal.len()
            + self.council_proposals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SandboxChain;
    use serde_json::json;

    #[test]
    fn test_resolve_module_priority() {
        let chain = SandboxChain::new();
        chain.register_module("elections");
        chain.register_module("electionsPhragmen");

        let module = resolve_module(&chain, elections::ELECTIONS_MODULES).unwrap();
        assert_eq!(module, "electionsPhragmen");

        chain.register_module("phragmenElection");
        let module = resolve_module(&chain, elections::ELECTIONS_MODULES).unwrap();
        assert_eq!(module, "phragmenElection");
    }

    #[test]
    fn test_resolve_module_none_found() {
        let chain = SandboxChain::new();
        let err = resolve_module(&chain, &["a", "b"]).unwrap_err();
        assert_eq!(
            err,
            DeriveError::ModuleNotFound {
                candidates: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn test_decode_null_is_default() {
        let path = StoragePath::new("council", "members");
        let members: Vec<AccountId> = decode(&path, json!(null)).unwrap();
        assert!(members.is_empty());

        let err = decode::<Vec<AccountId>>(&path, json!({"not": "a list"})).unwrap_err();
        assert!(matches!(err, DeriveError::Decode { ref path, .. } if path == "council.members"));
    }

    #[test]
    fn test_constants() {
        let chain = SandboxChain::new();
        let path = StoragePath::new("elections", "termDuration");
        assert_eq!(optional_constant::<u32>(&chain, &path).unwrap(), None);
        assert_eq!(
            required_constant::<u32>(&chain, &path).unwrap_err(),
            DeriveError::MissingConstant("elections.termDuration".into())
        );

        chain.set_constant(path.clone(), json!(100));
        assert_eq!(required_constant::<u32>(&chain, &path).unwrap(), 100);
    }

    #[tokio::test]
    async fn test_proposal_snapshot_is_not_cached() {
        let chain = Arc::new(SandboxChain::new());
        chain.register_module("council");
        let derive = ChainDerive::new(chain.clone());
        let hash = Hash::from_bytes([7; 32]);

        assert_eq!(derive.council_proposal_snapshot(hash).await.unwrap(), None);
        assert_eq!(derive.cached_subscriptions(), 0);

        for _ in 0..100 {
            if chain.stats().live_queries == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(chain.stats().live_queries, 0);
    }

    #[tokio::test]
    async fn test_clear_cache_disposes_queries() {
        let chain = Arc::new(SandboxChain::new());
        chain.set_storage(StoragePath::new("council", "members"), json!(["alice"]));
        let derive = ChainDerive::new(chain.clone());

        let members = derive.council_members();
        assert_eq!(*members.first().await.unwrap().unwrap(), vec![AccountId::new("alice")]);
        assert_eq!(derive.cached_subscriptions(), 1);
        assert_eq!(chain.stats().live_queries, 1);

        assert_eq!(derive.clear_cache(), 1);
        assert_eq!(derive.cached_subscriptions(), 0);

        for _ in 0..100 {
            if chain.stats().live_queries == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(chain.stats().live_queries, 0);
    }
}
