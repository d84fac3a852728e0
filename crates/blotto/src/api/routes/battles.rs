use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    api::{ApiError, AuthPubkey},
    domain::{
        battles::BattleError,
        stores::{Battle, Player, Role},
    },
    startup::AppState,
};

fn battle_error(err: BattleError) -> ApiError {
    match err {
        BattleError::InvalidAmount(_)
        | BattleError::ExpiryTooShort
        | BattleError::CltvTooLong
        | BattleError::NotJoinable
        | BattleError::InvalidNumber => ApiError::bad_request(err.to_string()),
        BattleError::Store(crate::domain::stores::StoreError::BattleNotFound) => {
            ApiError::bad_request(err.to_string())
        }
        _ => ApiError::internal(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBattleRequest {
    pub amount: u64,
    pub number: u16,
    pub invoice: String,
}

#[derive(Debug, Serialize)]
pub struct CreateBattleResponse {
    pub battle_id: u64,
    pub hold_invoice: String,
}

pub async fn create_battle(
    State(state): State<Arc<AppState>>,
    AuthPubkey(public_key): AuthPubkey,
    Json(request): Json<CreateBattleRequest>,
) -> Result<Json<CreateBattleResponse>, ApiError> {
    let player = Player {
        public_key,
        invoice: request.invoice,
        number: request.number,
        role: Role::Creator,
    };

    let created = state
        .battles
        .create(request.amount, player)
        .await
        .map_err(battle_error)?;

    Ok(Json(CreateBattleResponse {
        battle_id: created.battle_id,
        hold_invoice: created.hold_invoice,
    }))
}

#[derive(Debug, Deserialize)]
pub struct JoinBattleRequest {
    pub number: u16,
    pub invoice: String,
}

#[derive(Debug, Serialize)]
pub struct JoinBattleResponse {
    pub hold_invoice: String,
}

pub async fn join_battle(
    State(state): State<Arc<AppState>>,
    AuthPubkey(public_key): AuthPubkey,
    Path(battle_id): Path<u64>,
    Json(request): Json<JoinBattleRequest>,
) -> Result<Json<JoinBattleResponse>, ApiError> {
    let player = Player {
        public_key,
        invoice: request.invoice,
        number: request.number,
        role: Role::Challenger,
    };

    let hold_invoice = state
        .battles
        .request_join(battle_id, player)
        .await
        .map_err(battle_error)?;

    Ok(Json(JoinBattleResponse { hold_invoice }))
}

#[derive(Debug, Deserialize)]
pub struct BattlesQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Serialize)]
pub struct BattlesResponse {
    pub battles: Vec<Battle>,
}

pub async fn get_battles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BattlesQuery>,
) -> Result<Json<BattlesResponse>, ApiError> {
    let battles = state
        .battles
        .list(query.offset, query.limit, query.reverse)
        .await
        .map_err(battle_error)?;

    Ok(Json(BattlesResponse { battles }))
}
