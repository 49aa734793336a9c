use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use satbridge_core::explorer::parse_txid;
use satbridge_core::types::{Input, Transaction};

use super::error::AppError;
use super::{check_currency, rfc3339, SharedState};

// ==============================================================================
// DTOs
// ==============================================================================

/// Wire shape of a transaction. Amounts are satoshis, times RFC 3339.
#[derive(Serialize)]
pub(super) struct TransactionResponse {
    id: String,
    hash: String,
    received_at: String,
    lock_time: u32,
    fees: u64,
    amount: u64,
    confirmations: u64,
    inputs: Vec<InputResponse>,
    outputs: Vec<OutputResponse>,
    block: Option<BlockSummary>,
}

#[derive(Serialize)]
pub(super) struct InputResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    coinbase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    script_signature: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    txinwitness: Vec<String>,
    input_index: u32,
    sequence: u32,
}

#[derive(Serialize)]
pub(super) struct OutputResponse {
    output_index: u32,
    value: u64,
    script_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
}

#[derive(Serialize)]
pub(super) struct BlockSummary {
    hash: String,
    height: u32,
    time: String,
}

impl TransactionResponse {
    pub(super) fn from_core(tx: &Transaction) -> Result<Self, AppError> {
        let inputs = tx
            .inputs
            .iter()
            .map(|input| match input {
                Input::Coinbase(coinbase) => InputResponse {
                    coinbase: Some(coinbase.coinbase_script.clone()),
                    output_hash: None,
                    output_index: None,
                    value: None,
                    address: None,
                    script_signature: None,
                    txinwitness: coinbase.witness.clone(),
                    input_index: coinbase.input_index,
                    sequence: coinbase.sequence,
                },
                Input::Spending(spending) => InputResponse {
                    coinbase: None,
                    output_hash: Some(spending.output_hash.to_string()),
                    output_index: Some(spending.output_index),
                    value: Some(spending.value.to_sat()),
                    address: spending.address.clone(),
                    script_signature: Some(spending.script_sig.clone()),
                    txinwitness: spending.witness.clone(),
                    input_index: spending.input_index,
                    sequence: spending.sequence,
                },
            })
            .collect();

        let outputs = tx
            .outputs
            .iter()
            .map(|output| OutputResponse {
                output_index: output.output_index,
                value: output.value.to_sat(),
                script_hex: output.script_hex.clone(),
                address: output.address.clone(),
            })
            .collect();

        let block = match &tx.block {
            Some(block) => Some(BlockSummary {
                hash: block.hash.to_string(),
                height: block.height,
                time: rfc3339(block.time)?,
            }),
            None => None,
        };

        Ok(Self {
            id: tx.id.to_string(),
            hash: tx.hash.to_string(),
            received_at: rfc3339(tx.received_at)?,
            lock_time: tx.lock_time,
            fees: tx.fees.to_sat(),
            amount: tx.amount.to_sat(),
            confirmations: tx.confirmations,
            inputs,
            outputs,
            block,
        })
    }
}

#[derive(Serialize)]
pub(super) struct TransactionHex {
    transaction_hash: String,
    hex: String,
}

#[derive(Deserialize)]
pub(super) struct SendRequest {
    tx: String,
}

// ==============================================================================
// Handlers
// ==============================================================================

pub(super) async fn get_transaction(
    State(state): State<SharedState>,
    Path((_version, currency, hash)): Path<(String, String, String)>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    check_currency(&state, &currency)?;

    let txid = parse_txid(&hash)?;
    let tx = state.explorer.transaction(&txid).await?;
    Ok(Json(vec![TransactionResponse::from_core(&tx)?]))
}

pub(super) async fn get_transaction_hex(
    State(state): State<SharedState>,
    Path((_version, currency, hash)): Path<(String, String, String)>,
) -> Result<Json<Vec<TransactionHex>>, AppError> {
    check_currency(&state, &currency)?;

    let txid = parse_txid(&hash)?;
    let hex = state.explorer.transaction_hex(&txid).await?;
    Ok(Json(vec![TransactionHex {
        transaction_hash: hash,
        hex,
    }]))
}

pub(super) async fn send_transaction(
    State(state): State<SharedState>,
    Path((_version, currency)): Path<(String, String)>,
    Json(request): Json<SendRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_currency(&state, &currency)?;

    let txid = state.explorer.broadcast(&request.tx).await?;
    Ok(Json(serde_json::json!({ "result": txid.to_string() })))
}
