use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, WalletId, cards::CardView};
use crate::{
    app_state::AppState,
    cards::{CardError, CreateBoltCardInput},
};

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    a: String, // one-time pairing code
}

/// Card programming payload consumed by the Bolt Card programmer apps.
#[derive(Debug, Serialize)]
pub struct CardPairingResponse {
    pub protocol_name: String,
    pub protocol_version: u32,
    pub card_name: String,
    pub lnurlw_base: String,
    pub k0: String,
    pub k1: String,
    pub k2: String,
    pub k3: String,
    pub k4: String,
}

/// GET /new?a={otp}
/// Returns card keys for NFC programming. Each OTP works once.
pub async fn pair_card(
    Query(params): Query<PairQuery>,
    State(state): State<AppState>,
) -> Result<Json<CardPairingResponse>, ApiError> {
    let card = state.cards.pair_card(params.a.trim()).await.map_err(|e| match e {
        CardError::NotFound => {
            ApiError::new(StatusCode::NOT_FOUND, "Invalid OTP or card not found")
        }
        other => other.into(),
    })?;

    let lnurlw_base = state.config.lnurlw_base(&card.id).map_err(|e| {
        tracing::error!(error = ?e, "cannot build lnurlw base");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error")
    })?;

    Ok(Json(CardPairingResponse {
        protocol_name: "create_bolt_card_response".to_string(),
        protocol_version: 2,
        card_name: card.card_name,
        lnurlw_base,
        k0: card.k0,
        k1: card.k1,
        k2: card.k2,
        k3: card.k3,
        k4: card.k4,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCardRequest {
    pub card_name: String,
    pub uid: String,
    pub k0: String,
    pub k1: String,
    pub k2: String,
    pub k3: String,
    pub k4: String,
    pub tx_limit: Option<i64>,
    pub daily_limit: Option<i64>,
}

/// POST /api/cards
/// Registers a card for the caller's wallet.
pub async fn create_card(
    State(state): State<AppState>,
    WalletId(wallet_id): WalletId,
    Json(req): Json<CreateCardRequest>,
) -> Result<(StatusCode, Json<CardView>), ApiError> {
    let card = state
        .cards
        .create_card(&CreateBoltCardInput {
            wallet_id,
            card_name: req.card_name,
            uid: req.uid,
            k0: req.k0,
            k1: req.k1,
            k2: req.k2,
            k3: req.k3,
            k4: req.k4,
            tx_limit: req.tx_limit,
            daily_limit: req.daily_limit,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CardView::new(card, Vec::new()))))
}
