use axum::{
    extract::{Query, State},
    Json,
};
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::{api::ApiError, crypto, domain::stores::StoreError, startup::AppState};

#[derive(Debug, Deserialize)]
pub struct WithdrawQuery {
    /// Signature over the public key, echoed back by the wallet
    pub k1: String,
    pub pubkey: String,
    /// BOLT11 invoice to pay
    pub pr: String,
    #[serde(default)]
    pub fee: u64,
}

#[derive(Debug, Serialize)]
pub struct WithdrawReply {
    pub payment_id: u64,
    pub status: &'static str,
}

/// LNURL-withdraw callback: debits the caller's prizes and pays their
/// invoice.
///
/// The debit commits before the payment goes out so nobody can request
/// more than they hold; a failed payment restores the funds through the
/// payment stream consumer.
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WithdrawQuery>,
) -> Result<Json<WithdrawReply>, ApiError> {
    crypto::verify_signature(&query.pubkey, &query.k1).map_err(ApiError::lnurl_bad_request)?;

    let invoice = state
        .ln
        .decode_pay_req(&query.pr)
        .await
        .map_err(ApiError::lnurl_bad_request)?;

    if invoice.num_sat() == 0 {
        return Err(ApiError::lnurl_bad_request("invalid invoice amount"));
    }

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if now >= invoice.timestamp_secs() + invoice.expiry_secs() {
        return Err(ApiError::lnurl_bad_request("invoice expired"));
    }

    let withdraw_amount = invoice.num_sat() + query.fee;

    match state
        .stores
        .prizes
        .withdraw(&query.pubkey, withdraw_amount)
        .await
    {
        Ok(()) => {}
        Err(StoreError::InsufficientPrizes) => {
            return Err(ApiError::lnurl_bad_request(StoreError::InsufficientPrizes))
        }
        Err(e) => return Err(ApiError::lnurl_internal(e)),
    }

    let payment_id = state
        .tracker
        .track(&invoice.payment_hash, &query.pubkey, withdraw_amount);

    // Fire the payment without holding the request open; the terminal
    // outcome reaches the client through the payments event stream
    let ln = state.ln.clone();
    let streamer = state.streamer.clone();
    let payment_request = query.pr.clone();
    let payment_hash = invoice.payment_hash.clone();
    let amount_sat = invoice.num_sat();
    let fee = query.fee;
    tokio::spawn(async move {
        if let Err(e) = ln.send_payment(&payment_request, amount_sat, fee, None).await {
            error!("handing withdrawal payment to the node: {}", e);
            streamer.payment_send_failed(&payment_hash, &e.to_string()).await;
        }
    });

    Ok(Json(WithdrawReply {
        payment_id,
        status: "OK",
    }))
}
