//! Sandbox chain endpoints
//!
//! Storage writes here stand in for chain state changes: every live derived
//! view watching the written path emits a fresh snapshot.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::chain::{ChainStats, StoragePath, StorageValue};
use crate::types::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub chain: ChainStats,
    pub cached_subscriptions: usize,
}

#[derive(Debug, Deserialize)]
pub struct SetStorageRequest {
    /// `module.item` or `module.item(key)`
    pub path: String,
    pub value: StorageValue,
}

#[derive(Debug, Serialize)]
pub struct SetStorageResponse {
    pub success: bool,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub cleared: usize,
}

/// GET /api/chain/summary - Loaded storage and live query statistics
pub async fn get_summary(State(state): State<AppState>) -> ApiResult<Json<SummaryResponse>> {
    Ok(Json(SummaryResponse {
        chain: state.chain.stats(),
        cached_subscriptions: state.derive.cached_subscriptions(),
    }))
}

/// POST /api/chain/storage - Write a storage value
pub async fn set_storage(
    State(state): State<AppState>,
    Json(req): Json<SetStorageRequest>,
) -> ApiResult<Json<SetStorageResponse>> {
    let path: StoragePath = req.path.parse().map_err(ApiError::BadRequest)?;
    tracing::info!("Sandbox write to {}", path);
    state.chain.set_storage(path.clone(), req.value);

    Ok(Json(SetStorageResponse {
        success: true,
        path: path.to_string(),
    }))
}

/// POST /api/derive/clear - Dispose every cached derived subscription
pub async fn clear_cache(State(state): State<AppState>) -> ApiResult<Json<ClearResponse>> {
    let cleared = state.derive.clear_cache();
    Ok(Json(ClearResponse {
        success: true,
        cleared,
    }))
}
