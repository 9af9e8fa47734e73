//! Elections info derivation
//!
//! Combines council membership with the election module's candidates,
//! members and runners-up into one [`ElectionsInfo`] snapshot per storage
//! change. The election module was renamed across runtime versions, so its
//! name is resolved against the chain before querying.

use serde::Serialize;
use std::sync::Arc;

use super::shape::{seat_holders, Candidate, Member};
use super::{
    decode, failed, map_query, optional_constant, required_constant, resolve_module, DeriveError,
    DeriveStream,
};
use crate::chain::{AccountId, Balance, BlockNumber, ChainApi, StoragePath, StorageValue};

/// Election module names, newest first
pub const ELECTIONS_MODULES: &[&str] = &["phragmenElection", "electionsPhragmen", "elections"];

/// Collective whose membership the elections fill
pub const COUNCIL_MODULES: &[&str] = &["council", "generalCouncil"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionsInfo {
    pub candidacy_bond: Option<Balance>,
    pub candidate_count: u32,
    pub candidates: Vec<AccountId>,
    pub desired_seats: u32,
    pub desired_runners_up: Option<u32>,
    pub members: Vec<(AccountId, Balance)>,
    pub runners_up: Vec<(AccountId, Balance)>,
    pub term_duration: BlockNumber,
    pub voting_bond: Option<Balance>,
}

/// Storage paths read by the derivation, in query order
struct ElectionsPaths {
    module: &'static str,
    council_members: StoragePath,
    candidates: StoragePath,
    members: StoragePath,
    runners_up: StoragePath,
}

impl ElectionsPaths {
    fn new(council: &'static str, module: &'static str) -> Self {
        Self {
            module,
            council_members: StoragePath::new(council, "members"),
            candidates: StoragePath::new(module, "candidates"),
            members: StoragePath::new(module, "members"),
            runners_up: StoragePath::new(module, "runnersUp"),
        }
    }

    fn queries(&self) -> Vec<StoragePath> {
        vec![
            self.council_members.clone(),
            self.candidates.clone(),
            self.members.clone(),
            self.runners_up.clone(),
        ]
    }

    fn constant(&self, item: &str) -> StoragePath {
        StoragePath::new(self.module, item)
    }
}

/// Live elections view for `api`
pub fn info(api: Arc<dyn ChainApi>) -> DeriveStream<ElectionsInfo> {
    let resolved = resolve_module(api.as_ref(), COUNCIL_MODULES)
        .and_then(|council| Ok((council, resolve_module(api.as_ref(), ELECTIONS_MODULES)?)));
    let (council, module) = match resolved {
        Ok(modules) => modules,
        Err(e) => return failed(e),
    };

    let paths = ElectionsPaths::new(council, module);
    let source = api.query_multi(&paths.queries());
    map_query(source, move |values| build_info(api.as_ref(), &paths, values))
}

fn build_info(
    api: &dyn ChainApi,
    paths: &ElectionsPaths,
    values: Vec<StorageValue>,
) -> Result<ElectionsInfo, DeriveError> {
    let [council_members, candidates, members, runners_up]: [StorageValue; 4] =
        values.try_into().map_err(|v: Vec<StorageValue>| DeriveError::Decode {
            path: paths.module.to_string(),
            message: format!("expected 4 query results, got {}", v.len()),
        })?;

    let council_members: Vec<AccountId> = decode(&paths.council_members, council_members)?;
    let candidates: Vec<Candidate> = decode(&paths.candidates, candidates)?;
    let members: Vec<Member> = decode(&paths.members, members)?;
    let runners_up: Vec<Member> = decode(&paths.runners_up, runners_up)?;

    let candidate_count = u32::try_from(candidates.len()).map_err(|_| DeriveError::Decode {
        path: paths.candidates.to_string(),
        message: format!("candidate count {} exceeds u32", candidates.len()),
    })?;

    // Before the first election round the module has no members; fall back to
    // the council itself with zero stake.
    let members = if members.is_empty() {
        council_members
            .into_iter()
            .map(|who| (who, Balance::zero()))
            .collect()
    } else {
        seat_holders(members)
    };

    Ok(ElectionsInfo {
        candidacy_bond: optional_constant(api, &paths.constant("candidacyBond"))?,
        candidate_count,
        candidates: candidates.into_iter().map(Candidate::into_account).collect(),
        desired_seats: required_constant(api, &paths.constant("desiredMembers"))?,
        desired_runners_up: optional_constant(api, &paths.constant("desiredRunnersUp"))?,
        members,
        runners_up: seat_holders(runners_up),
        term_duration: required_constant(api, &paths.constant("termDuration"))?,
        voting_bond: optional_constant(api, &paths.constant("votingBond"))?,
    })
}
