use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    api::{ApiError, AuthPubkey},
    domain::lottery,
    infra::lightning::DEFAULT_INVOICE_EXPIRY_SECS,
    startup::AppState,
};

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub amount: u64,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub payment_id: u64,
    pub invoice: String,
}

/// Offers an invoice whose settlement buys tickets in the active epoch.
pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    AuthPubkey(public_key): AuthPubkey,
    Query(query): Query<InvoiceQuery>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    if query.amount == 0 {
        return Err(ApiError::bad_request("invalid amount"));
    }

    let info = lottery::info(state.ln.as_ref(), &state.stores)
        .await
        .map_err(ApiError::internal)?;

    // An invoice may be requested under the capacity but paid after it
    // shrank; the funds would then sit outside the pool until the next
    // epoch, so the cap is enforced at offer time
    if query.amount > info.capacity as u64 {
        return Err(ApiError::bad_request(format!(
            "requested amount exceeds current capacity. Amount should be equal or lower than {}",
            info.capacity
        )));
    }

    let invoice = state
        .ln
        .add_invoice(query.amount, DEFAULT_INVOICE_EXPIRY_SECS, "blotto tickets")
        .await
        .map_err(ApiError::internal)?;

    let payment_id = state
        .tracker
        .track(&invoice.r_hash, &public_key, query.amount);

    Ok(Json(InvoiceResponse {
        payment_id,
        invoice: invoice.payment_request,
    }))
}
