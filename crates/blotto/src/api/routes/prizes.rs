use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    api::{ApiError, AuthPubkey},
    startup::AppState,
};

#[derive(Debug, Serialize)]
pub struct PrizesResponse {
    pub prizes: u64,
}

pub async fn get_prizes(
    State(state): State<Arc<AppState>>,
    AuthPubkey(public_key): AuthPubkey,
) -> Result<Json<PrizesResponse>, ApiError> {
    let prizes = state
        .stores
        .prizes
        .get(&public_key)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(PrizesResponse { prizes }))
}
