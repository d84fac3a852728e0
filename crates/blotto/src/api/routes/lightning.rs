use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    api::{request_origin, ApiError, AuthPubkey},
    crypto,
    domain::stores::StoreError,
    infra::lnurl::{parse_address, WithdrawResponse, WITHDRAW_FEE_PPM},
    startup::AppState,
};

#[derive(Debug, Serialize)]
pub struct GetAddressResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub has_address: bool,
}

pub async fn get_lightning_address(
    State(state): State<Arc<AppState>>,
    AuthPubkey(public_key): AuthPubkey,
) -> Result<Json<GetAddressResponse>, ApiError> {
    match state.stores.lightning.get(&public_key).await {
        Ok(address) => Ok(Json(GetAddressResponse {
            address: Some(address),
            has_address: true,
        })),
        Err(StoreError::NoAddress) => Ok(Json(GetAddressResponse {
            address: None,
            has_address: false,
        })),
        Err(e) => Err(ApiError::internal(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetAddressQuery {
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct SetAddressResponse {
    pub success: bool,
}

pub async fn set_lightning_address(
    State(state): State<Arc<AppState>>,
    AuthPubkey(public_key): AuthPubkey,
    Query(query): Query<SetAddressQuery>,
) -> Result<Json<SetAddressResponse>, ApiError> {
    if parse_address(&query.address).is_none() {
        return Err(ApiError::bad_request("invalid lightning address"));
    }

    state
        .stores
        .lightning
        .set(&public_key, &query.address)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(SetAddressResponse { success: true }))
}

#[derive(Debug, Deserialize)]
pub struct LnurlWithdrawQuery {
    pub signature: String,
}

/// Serves the LNURL withdrawal document the wallet turns into a
/// `/api/withdraw` callback.
pub async fn lnurl_withdraw(
    State(state): State<Arc<AppState>>,
    AuthPubkey(public_key): AuthPubkey,
    headers: HeaderMap,
    Query(query): Query<LnurlWithdrawQuery>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    crypto::verify_signature(&public_key, &query.signature)
        .map_err(ApiError::lnurl_bad_request)?;

    let total_prizes = state
        .stores
        .prizes
        .get(&public_key)
        .await
        .map_err(ApiError::lnurl_internal)?;

    let fee = total_prizes * WITHDRAW_FEE_PPM / 1_000_000;

    let (min_withdrawable_msat, max_withdrawable_msat) = if total_prizes > 0 {
        (1000, (total_prizes - fee) as i64 * 1000)
    } else {
        (0, 0)
    };

    let origin = request_origin(&headers)?;
    let callback = format!(
        "{}/api/withdraw?fee={}&pubkey={}",
        origin, fee, public_key
    );

    Ok(Json(WithdrawResponse {
        tag: "withdrawalRequest",
        callback,
        k1: query.signature,
        default_description: "blotto withdrawal",
        min_withdrawable: min_withdrawable_msat,
        max_withdrawable: max_withdrawable_msat,
    }))
}
