use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    api::ApiError,
    domain::lottery::{self, Info},
    startup::AppState,
};

pub async fn get_lottery(State(state): State<Arc<AppState>>) -> Result<Json<Info>, ApiError> {
    let info = lottery::info(state.ln.as_ref(), &state.stores)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
pub struct HeightsQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Serialize)]
pub struct HeightsResponse {
    pub heights: Vec<u32>,
}

pub async fn get_heights(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HeightsQuery>,
) -> Result<Json<HeightsResponse>, ApiError> {
    let heights = state
        .stores
        .lotteries
        .list_heights(query.offset, query.limit, query.reverse)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(HeightsResponse { heights }))
}
