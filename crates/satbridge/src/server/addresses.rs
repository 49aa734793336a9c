use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::Json;
use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

use satbridge_core::filter::split_addresses;

use super::error::AppError;
use super::transactions::TransactionResponse;
use super::{check_currency, SharedState};

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct ActivityQuery {
    block_hash: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ActivityResponse {
    truncated: bool,
    txs: Vec<TransactionResponse>,
}

// ==============================================================================
// Handler
// ==============================================================================

pub(super) async fn get_address_transactions(
    State(state): State<SharedState>,
    Path((_version, currency, addresses)): Path<(String, String, String)>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ActivityResponse>, AppError> {
    check_currency(&state, &currency)?;

    let addresses = split_addresses(&addresses);
    if addresses.is_empty() {
        return Err(AppError::BadRequest("no addresses given".to_string()));
    }
    let block_hash = match query.block_hash.as_deref().filter(|h| !h.is_empty()) {
        None => None,
        Some(raw) => {
            let hex = raw.strip_prefix("0x").unwrap_or(raw);
            Some(
                BlockHash::from_str(hex)
                    .map_err(|e| AppError::BadRequest(format!("invalid block_hash: {e}")))?,
            )
        }
    };

    let activity = state
        .explorer
        .activity(&addresses, block_hash.as_ref())
        .await?;
    let txs = activity
        .iter()
        .map(TransactionResponse::from_core)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ActivityResponse {
        truncated: false,
        txs,
    }))
}
