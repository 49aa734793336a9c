use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use satbridge_core::explorer::BlockReference;
use satbridge_core::types::BlockWithTxs;

use super::error::AppError;
use super::{check_currency, rfc3339, SharedState};

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Serialize)]
pub(super) struct BlockResponse {
    /// `0x`-prefixed.
    hash: String,
    height: u32,
    time: String,
    /// `0x`-prefixed.
    txs: Vec<String>,
}

impl BlockResponse {
    fn from_core(block: &BlockWithTxs) -> Result<Self, AppError> {
        Ok(Self {
            hash: format!("0x{}", block.block.hash),
            height: block.block.height,
            time: rfc3339(block.block.time)?,
            txs: block.txs.iter().map(|txid| format!("0x{txid}")).collect(),
        })
    }
}

// ==============================================================================
// Handler
// ==============================================================================

/// `current` answers with a bare block; hashes and heights answer with a
/// one-element list.
pub(super) async fn get_block(
    State(state): State<SharedState>,
    Path((_version, currency, block_ref)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    check_currency(&state, &currency)?;

    let reference: BlockReference = block_ref.parse()?;
    let block = state.explorer.block(reference).await?;
    let response = BlockResponse::from_core(&block)?;

    Ok(match reference {
        BlockReference::Current => Json(response).into_response(),
        _ => Json(vec![response]).into_response(),
    })
}
