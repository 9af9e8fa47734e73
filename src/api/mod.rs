//! API endpoints for the derive sandbox

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

mod chain;
mod council;
mod elections;

use crate::chain::SandboxChain;
use crate::derive::{ChainDerive, Shared};
use crate::types::{ApiError, ApiResult};

/// Shared application state: the sandbox chain and the derivations bound to it
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<SandboxChain>,
    pub derive: Arc<ChainDerive>,
}

impl AppState {
    pub fn new(chain: Arc<SandboxChain>) -> Self {
        let derive = Arc::new(ChainDerive::new(chain.clone()));
        Self { chain, derive }
    }
}

/// Create the API router with all endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        // Derived views
        .route("/elections/info", get(elections::get_info))
        .route("/council/members", get(council::get_members))
        .route("/council/proposals", get(council::get_proposals))
        .route("/council/proposals/:hash", get(council::get_proposal))
        // Sandbox chain
        .route("/chain/summary", get(chain::get_summary))
        .route("/chain/storage", post(chain::set_storage))
        .route("/derive/clear", post(chain::clear_cache))
        .with_state(state)
}

/// Latest snapshot of a shared derivation, waiting for the first one if needed
async fn latest_snapshot<T: Clone>(shared: Shared<T>, what: &str) -> ApiResult<T> {
    match shared.first().await {
        Some(Ok(value)) => Ok((*value).clone()),
        Some(Err(e)) => Err(ApiError::from(e)),
        None => {
            tracing::warn!("{} subscription ended without a value", what);
            Err(ApiError::Internal(format!(
                "{} subscription ended without a value",
                what
            )))
        }
    }
}
