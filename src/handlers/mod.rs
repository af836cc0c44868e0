pub mod cards;
pub mod lnurlw;
pub mod register;

use axum::{
    Json, Router,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{app_state::AppState, cards::CardError};

pub fn router(state: AppState) -> Router {
    Router::new()
        // LNURL-withdraw endpoints
        .route("/api/lnurl/withdraw/{card_id}", get(lnurlw::withdraw_request))
        .route("/api/lnurl/withdraw/callback/{k1}", get(lnurlw::withdraw_callback))
        // Card pairing and registration
        .route("/new", get(register::pair_card))
        .route("/api/cards", post(register::create_card).get(cards::list_cards))
        // Owner card management
        .route("/api/cards/{id}", get(cards::get_card).patch(cards::update_card))
        .route("/api/cards/{id}/disable", post(cards::disable_card))
        .route("/api/cards/{id}/enable", post(cards::enable_card))
        .route("/api/cards/{id}/otp", post(cards::generate_otp))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    errors: Vec<ErrorMessage>,
}

/// Management API error, rendered as `{"errors": [{"message": ...}]}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            errors: vec![ErrorMessage {
                message: self.message,
            }],
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CardError> for ApiError {
    fn from(err: CardError) -> Self {
        let status = match &err {
            CardError::Invalid(_)
            | CardError::Disabled
            | CardError::LimitExceeded(_)
            | CardError::CounterNotAdvanced { .. } => StatusCode::BAD_REQUEST,
            CardError::AlreadyExists(_) | CardError::AlreadySpent => StatusCode::CONFLICT,
            CardError::NotFound | CardError::UsageNotFound => StatusCode::NOT_FOUND,
            CardError::Repository(e) => {
                tracing::error!(error = ?e, "card repository failure");
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error");
            }
        };
        Self::new(status, err.to_string())
    }
}

/// Header carrying the authenticated wallet, set by the session layer in
/// front of this service.
pub const WALLET_HEADER: &str = "x-wallet-id";

/// The caller's wallet.
#[derive(Debug, Clone)]
pub struct WalletId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for WalletId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(WALLET_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| WalletId(v.to_string()))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Not authenticated"))
    }
}
