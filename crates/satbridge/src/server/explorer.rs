use axum::extract::{Path, Query, State};
use axum::Json;

use satbridge_core::explorer::{ExplorerStatus, FeeEstimates, NetworkSummary, DEFAULT_FEE_TARGETS};
use satbridge_core::rpc::FeeMode;

use super::error::AppError;
use super::{check_currency, SharedState};

pub(super) async fn get_health(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .explorer
        .health()
        .await
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    Ok(Json(serde_json::json!({ "status": "OK" })))
}

pub(super) async fn get_status(State(state): State<SharedState>) -> Json<ExplorerStatus> {
    Json(state.explorer.status().await)
}

pub(super) async fn get_network(
    State(state): State<SharedState>,
) -> Result<Json<NetworkSummary>, AppError> {
    Ok(Json(state.explorer.network().await?))
}

/// `?block_count=N` may repeat. Unparsable counts are ignored and an
/// unknown `mode` falls back to conservative estimation.
pub(super) async fn get_fees(
    State(state): State<SharedState>,
    Path((_version, currency)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<FeeEstimates>, AppError> {
    check_currency(&state, &currency)?;

    let mut targets: Vec<u16> = params
        .iter()
        .filter(|(key, _)| key == "block_count")
        .filter_map(|(_, value)| value.parse().ok())
        .collect();
    if targets.is_empty() {
        targets = DEFAULT_FEE_TARGETS.to_vec();
    }
    let mode = params
        .iter()
        .find(|(key, _)| key == "mode")
        .and_then(|(_, value)| value.parse::<FeeMode>().ok())
        .unwrap_or_default();

    Ok(Json(state.explorer.fees(&targets, mode).await?))
}
