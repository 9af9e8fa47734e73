//! Elections endpoints

use axum::{extract::State, Json};

use super::{latest_snapshot, AppState};
use crate::derive::ElectionsInfo;
use crate::types::ApiResult;

/// GET /api/elections/info - Candidates, members, runners-up and election constants
pub async fn get_info(State(state): State<AppState>) -> ApiResult<Json<ElectionsInfo>> {
    let info = latest_snapshot(state.derive.elections_info(), "elections.info").await?;
    Ok(Json(info))
}
