mod addresses;
mod blocks;
mod control;
mod error;
mod explorer;
mod transactions;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tower_http::cors::{AllowOrigin, CorsLayer};

use satbridge_core::Explorer;

use error::AppError;

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    pub explorer: Arc<Explorer>,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// Router
// ==============================================================================

pub fn build_router(state: AppState, origin: HeaderValue) -> Router {
    // Reflect the origin only on an exact match; other browser origins get
    // no CORS headers at all.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |request_origin: &HeaderValue, _| *request_origin == origin,
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let shared = Arc::new(state);

    let control_api = Router::new()
        .route(
            "/control/descriptors/import",
            post(control::import_accounts),
        )
        .route("/control/descriptors/has", post(control::has_descriptor));

    // The explorer API version segment is accepted but not interpreted.
    let explorer_api = Router::new()
        .route(
            "/blockchain/{version}/explorer/_health",
            get(explorer::get_health),
        )
        .route(
            "/blockchain/{version}/explorer/status",
            get(explorer::get_status),
        )
        .route(
            "/blockchain/{version}/explorer/network",
            get(explorer::get_network),
        );

    let currency_api = Router::new()
        .route("/blockchain/{version}/{currency}/fees", get(explorer::get_fees))
        .route(
            "/blockchain/{version}/{currency}/blocks/{block}",
            get(blocks::get_block),
        )
        .route(
            "/blockchain/{version}/{currency}/transactions/send",
            post(transactions::send_transaction),
        )
        .route(
            "/blockchain/{version}/{currency}/transactions/{hash}",
            get(transactions::get_transaction),
        )
        .route(
            "/blockchain/{version}/{currency}/transactions/{hash}/hex",
            get(transactions::get_transaction_hex),
        )
        .route(
            "/blockchain/{version}/{currency}/addresses/{addresses}/transactions",
            get(addresses::get_address_transactions),
        );

    Router::new()
        .route("/timestamp", get(timestamp))
        .merge(control_api)
        .merge(explorer_api)
        .merge(currency_api)
        .fallback(route_not_found)
        .layer(cors)
        .with_state(shared)
}

async fn timestamp() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "timestamp": OffsetDateTime::now_utc().unix_timestamp() }))
}

async fn route_not_found() -> AppError {
    AppError::NotFound("route not found".to_string())
}

/// Requests for a currency other than the node's are treated as unknown
/// routes.
fn check_currency(state: &AppState, currency: &str) -> Result<(), AppError> {
    let served = state.explorer.currency();
    if currency == served.as_str() {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "unsupported currency `{currency}` (this node serves `{served}`)"
        )))
    }
}

fn rfc3339(unix_seconds: u64) -> Result<String, AppError> {
    let seconds = i64::try_from(unix_seconds)
        .map_err(|_| AppError::Internal(format!("timestamp out of range: {unix_seconds}")))?;
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|e| AppError::Internal(format!("timestamp out of range: {e}")))?
        .format(&Rfc3339)
        .map_err(|e| AppError::Internal(format!("format timestamp: {e}")))
}
