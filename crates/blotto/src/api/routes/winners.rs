use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{api::ApiError, domain::stores::Winner, startup::AppState};

#[derive(Debug, Deserialize)]
pub struct WinnersQuery {
    pub height: u32,
}

#[derive(Debug, Serialize)]
pub struct WinnersResponse {
    pub winners: Vec<Winner>,
}

pub async fn get_winners(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WinnersQuery>,
) -> Result<Json<WinnersResponse>, ApiError> {
    let winners = state
        .stores
        .winners
        .list(query.height)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(WinnersResponse { winners }))
}
