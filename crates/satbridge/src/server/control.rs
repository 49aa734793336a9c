use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::AccountEntry;

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct ImportRequest {
    accounts: Vec<AccountEntry>,
}

#[derive(Deserialize)]
pub(super) struct HasDescriptorRequest {
    descriptor: String,
}

#[derive(Serialize)]
pub(super) struct HasDescriptorResponse {
    descriptor: String,
    has: bool,
}

// ==============================================================================
// Handlers
// ==============================================================================

/// Validate the accounts and import them in the background. The response
/// does not wait for the import or rescan.
pub(super) async fn import_accounts(
    State(state): State<SharedState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let accounts = request
        .accounts
        .into_iter()
        .enumerate()
        .map(|(index, entry)| entry.validate(index))
        .collect::<eyre::Result<Vec<_>>>()
        .map_err(|e| AppError::BadRequest(format!("{e:#}")))?;

    tracing::info!(accounts = accounts.len(), "account import requested");
    drop(state.explorer.import_accounts(accounts));
    Ok(Json(serde_json::json!({ "status": "OK" })))
}

pub(super) async fn has_descriptor(
    State(state): State<SharedState>,
    Json(request): Json<HasDescriptorRequest>,
) -> Result<Json<HasDescriptorResponse>, AppError> {
    let has = state.explorer.has_descriptor(&request.descriptor).await?;
    Ok(Json(HasDescriptorResponse {
        descriptor: request.descriptor,
        has,
    }))
}
