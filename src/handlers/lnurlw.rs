use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
};
use serde::{Deserialize, Serialize};

use crate::{
    app_state::AppState,
    cards::UsageMeta,
    withdraw::{WithdrawError, WithdrawRequestResponse},
};

#[derive(Debug, Deserialize)]
pub struct WithdrawParams {
    p: String, // encrypted UID + counter
    c: String, // SUN MAC
}

#[derive(Debug, Serialize)]
pub struct LnurlwError {
    pub status: String,
    pub reason: String,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn usage_meta(headers: &HeaderMap) -> UsageMeta {
    let forwarded = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()));
    UsageMeta {
        ip: forwarded.or_else(|| header_str(headers, "x-real-ip")),
        user_agent: header_str(headers, header::USER_AGENT.as_str()),
    }
}

/// GET /api/lnurl/withdraw/{card_id}?p={encrypted}&c={cmac}
/// LNURLw endpoint that authenticates a tap and returns withdrawal info
pub async fn withdraw_request(
    Path(card_id): Path<String>,
    Query(params): Query<WithdrawParams>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WithdrawRequestResponse>, (StatusCode, Json<LnurlwError>)> {
    state
        .withdraw
        .request(&card_id, &params.p, &params.c, usage_meta(&headers))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    k1: Option<String>,
    pr: String, // Lightning invoice
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub status: String,
}

/// GET /api/lnurl/withdraw/callback/{k1}?pr={invoice}
/// Pays the invoice against the usage authorized by the tap
pub async fn withdraw_callback(
    Path(k1): Path<String>,
    Query(params): Query<CallbackParams>,
    State(state): State<AppState>,
) -> Result<Json<CallbackResponse>, (StatusCode, Json<LnurlwError>)> {
    if params.k1.as_deref().is_some_and(|query_k1| query_k1 != k1) {
        return Err(error_response(&WithdrawError::RecordNotFound));
    }

    state
        .withdraw
        .callback(&k1, &params.pr)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(CallbackResponse {
        status: "OK".to_string(),
    }))
}

fn error_response(err: &WithdrawError) -> (StatusCode, Json<LnurlwError>) {
    let status = match err {
        WithdrawError::CardNotFound | WithdrawError::RecordNotFound => StatusCode::NOT_FOUND,
        WithdrawError::Internal(e) => {
            tracing::error!(error = ?e, "withdraw failed unexpectedly");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    };

    (
        status,
        Json(LnurlwError {
            status: "ERROR".to_string(),
            reason: err.public_message(),
        }),
    )
}
