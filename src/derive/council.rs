//! Council derivations: membership and collective proposals

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::elections::COUNCIL_MODULES;
use super::{decode, decode_value, failed, map_query, resolve_module, DeriveError, DeriveStream};
use crate::chain::{
    AccountId, BlockNumber, ChainApi, ChainError, Hash, QueryStream, StoragePath, StorageValue,
};

/// Tally of an open collective motion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Votes {
    pub index: u32,
    pub threshold: u32,
    pub ayes: Vec<AccountId>,
    pub nays: Vec<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<BlockNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectiveProposal {
    pub hash: Hash,
    /// Call the motion would dispatch, as exported
    pub proposal: StorageValue,
    pub votes: Option<Votes>,
}

fn proposal_paths(module: &str, hash: &Hash) -> [StoragePath; 2] {
    let key = hash.to_string();
    [
        StoragePath::keyed(module, "proposalOf", key.clone()),
        StoragePath::keyed(module, "voting", key),
    ]
}

/// Returns `None` when the proposal body is no longer stored.
fn build_proposal(
    module: &str,
    hash: Hash,
    proposal: StorageValue,
    voting: StorageValue,
) -> Result<Option<CollectiveProposal>, DeriveError> {
    if proposal.is_null() {
        return Ok(None);
    }
    let [_, voting_path] = proposal_paths(module, &hash);
    let votes = if voting.is_null() {
        None
    } else {
        Some(decode_value(&voting_path, voting)?)
    };

    Ok(Some(CollectiveProposal {
        hash,
        proposal,
        votes,
    }))
}

fn build_proposals(
    module: &str,
    hashes: &[Hash],
    values: Vec<StorageValue>,
) -> Result<Vec<CollectiveProposal>, DeriveError> {
    if values.len() != hashes.len() * 2 {
        return Err(DeriveError::Decode {
            path: format!("{}.proposals", module),
            message: format!(
                "expected {} query results, got {}",
                hashes.len() * 2,
                values.len()
            ),
        });
    }

    let mut proposals = Vec::with_capacity(hashes.len());
    let mut values = values.into_iter();
    for hash in hashes {
        let (Some(proposal), Some(voting)) = (values.next(), values.next()) else {
            break;
        };
        if let Some(p) = build_proposal(module, *hash, proposal, voting)? {
            proposals.push(p);
        }
    }
    Ok(proposals)
}

/// Current council membership
pub fn members(api: Arc<dyn ChainApi>) -> DeriveStream<Vec<AccountId>> {
    let module = match resolve_module(api.as_ref(), COUNCIL_MODULES) {
        Ok(module) => module,
        Err(e) => return failed(e),
    };
    let path = StoragePath::new(module, "members");
    let source = api.query_one(&path);
    map_query(source, move |value| decode(&path, value))
}

/// One proposal and its votes
pub fn proposal(api: Arc<dyn ChainApi>, hash: Hash) -> DeriveStream<Option<CollectiveProposal>> {
    let module = match resolve_module(api.as_ref(), COUNCIL_MODULES) {
        Ok(module) => module,
        Err(e) => return failed(e),
    };
    let source = api.query_multi(&proposal_paths(module, &hash));
    map_query(source, move |values: Vec<StorageValue>| {
        let mut values = values.into_iter();
        let proposal = values.next().unwrap_or(StorageValue::Null);
        let voting = values.next().unwrap_or(StorageValue::Null);
        build_proposal(module, hash, proposal, voting)
    })
}

/// All open proposals. Every change to the hash list replaces the per-proposal
/// query with a new one covering the current hashes.
pub fn proposals(api: Arc<dyn ChainApi>) -> DeriveStream<Vec<CollectiveProposal>> {
    let module = match resolve_module(api.as_ref(), COUNCIL_MODULES) {
        Ok(module) => module,
        Err(e) => return failed(e),
    };
    let hashes_path = StoragePath::new(module, "proposals");
    let mut hashes_rx = api.query_one(&hashes_path);

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut current: Option<(Vec<Hash>, QueryStream<Vec<StorageValue>>)> = None;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                outer = hashes_rx.recv() => {
                    let hashes = match outer {
                        None => break,
                        Some(item) => item
                            .map_err(DeriveError::from)
                            .and_then(|value| decode::<Vec<Hash>>(&hashes_path, value)),
                    };
                    match hashes {
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                        Ok(hashes) if hashes.is_empty() => {
                            current = None;
                            if tx.send(Ok(Vec::new())).is_err() {
                                break;
                            }
                        }
                        Ok(hashes) => {
                            let paths: Vec<StoragePath> = hashes
                                .iter()
                                .flat_map(|hash| proposal_paths(module, hash))
                                .collect();
                            tracing::debug!("Tracking {} council proposals", hashes.len());
                            current = Some((hashes, api.query_multi(&paths)));
                        }
                    }
                }
                inner = next_inner(&mut current) => {
                    let Some(item) = inner else {
                        current = None;
                        continue;
                    };
                    let hashes = current.as_ref().map(|(h, _)| h.as_slice()).unwrap_or_default();
                    let result = item
                        .map_err(DeriveError::from)
                        .and_then(|values| build_proposals(module, hashes, values));
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

async fn next_inner(
    current: &mut Option<(Vec<Hash>, QueryStream<Vec<StorageValue>>)>,
) -> Option<Result<Vec<StorageValue>, ChainError>> {
    match current {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}
