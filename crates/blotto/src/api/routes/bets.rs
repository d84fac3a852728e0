use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{api::ApiError, domain::stores::Bet, startup::AppState};

#[derive(Debug, Deserialize)]
pub struct BetsQuery {
    pub height: u32,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Serialize)]
pub struct BetsResponse {
    pub bets: Vec<Bet>,
}

pub async fn get_bets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BetsQuery>,
) -> Result<Json<BetsResponse>, ApiError> {
    let bets = state
        .stores
        .bets
        .list(query.height, query.offset, query.limit, query.reverse)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(BetsResponse { bets }))
}
