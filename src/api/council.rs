//! Council endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use super::{latest_snapshot, AppState};
use crate::chain::{AccountId, Hash};
use crate::derive::CollectiveProposal;
use crate::types::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub count: usize,
    pub members: Vec<AccountId>,
}

#[derive(Debug, Serialize)]
pub struct ProposalsResponse {
    pub count: usize,
    pub proposals: Vec<CollectiveProposal>,
}

/// GET /api/council/members - Current council membership
pub async fn get_members(State(state): State<AppState>) -> ApiResult<Json<MembersResponse>> {
    let members = latest_snapshot(state.derive.council_members(), "council.members").await?;
    Ok(Json(MembersResponse {
        count: members.len(),
        members,
    }))
}

/// GET /api/council/proposals - Open proposals with their votes
pub async fn get_proposals(State(state): State<AppState>) -> ApiResult<Json<ProposalsResponse>> {
    let proposals = latest_snapshot(state.derive.council_proposals(), "council.proposals").await?;
    Ok(Json(ProposalsResponse {
        count: proposals.len(),
        proposals,
    }))
}

/// GET /api/council/proposals/:hash - A single proposal
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<CollectiveProposal>> {
    let hash: Hash = hash.parse().map_err(ApiError::BadRequest)?;
    state
        .derive
        .council_proposal_snapshot(hash)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Proposal not found: {}", hash)))
}
