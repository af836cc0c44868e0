use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, WalletId};
use crate::{
    app_state::AppState,
    cards::{BoltCard, CardUsage, UpdateBoltCardInput},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageView {
    pub id: String,
    pub amount: u64,
    pub old_counter: u32,
    pub new_counter: u32,
    pub spent: bool,
    pub spent_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CardUsage> for UsageView {
    fn from(u: CardUsage) -> Self {
        Self {
            id: u.id,
            amount: u.amount,
            old_counter: u.old_counter,
            new_counter: u.new_counter,
            spent: u.spent,
            spent_at: u.spent_at,
            ip: u.ip,
            user_agent: u.user_agent,
            created_at: u.created_at,
        }
    }
}

/// Owner-facing card. Keys and OTP are never included.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub id: String,
    pub wallet_id: String,
    pub uid: String,
    pub card_name: String,
    pub counter: u32,
    pub enabled: bool,
    pub tx_limit: u64,
    pub daily_limit: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usages: Vec<UsageView>,
}

impl CardView {
    /// `usages` newest first.
    pub fn new(card: BoltCard, usages: Vec<CardUsage>) -> Self {
        Self {
            last_used_at: usages.iter().map(|u| u.created_at).max(),
            usages: usages.into_iter().map(UsageView::from).collect(),
            id: card.id,
            wallet_id: card.wallet_id,
            uid: card.uid,
            card_name: card.card_name,
            counter: card.counter,
            enabled: card.enabled,
            tx_limit: card.tx_limit,
            daily_limit: card.daily_limit,
            created_at: card.created_at,
            updated_at: card.updated_at,
        }
    }
}

async fn owned_card(state: &AppState, wallet_id: &str, id: &str) -> Result<BoltCard, ApiError> {
    let card = state
        .cards
        .find_card_by_id(id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Card not found"))?;

    if card.wallet_id != wallet_id {
        tracing::warn!(card_id = %id, wallet_id, "card accessed by another wallet");
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Card does not belong to user"));
    }
    Ok(card)
}

async fn view(state: &AppState, card: BoltCard) -> Result<CardView, ApiError> {
    let usages = state.cards.get_card_usage(&card.id).await?;
    Ok(CardView::new(card, usages))
}

/// GET /api/cards
pub async fn list_cards(
    State(state): State<AppState>,
    WalletId(wallet_id): WalletId,
) -> Result<Json<Vec<CardView>>, ApiError> {
    let mut views = Vec::new();
    for card in state.cards.find_cards_by_wallet_id(&wallet_id).await? {
        views.push(view(&state, card).await?);
    }
    Ok(Json(views))
}

/// GET /api/cards/{id}
pub async fn get_card(
    State(state): State<AppState>,
    WalletId(wallet_id): WalletId,
    Path(id): Path<String>,
) -> Result<Json<CardView>, ApiError> {
    let card = owned_card(&state, &wallet_id, &id).await?;
    Ok(Json(view(&state, card).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCardRequest {
    pub card_name: Option<String>,
    pub k0: Option<String>,
    pub k1: Option<String>,
    pub k2: Option<String>,
    pub k3: Option<String>,
    pub k4: Option<String>,
    pub enabled: Option<bool>,
    pub tx_limit: Option<i64>,
    pub daily_limit: Option<i64>,
}

/// PATCH /api/cards/{id}
pub async fn update_card(
    State(state): State<AppState>,
    WalletId(wallet_id): WalletId,
    Path(id): Path<String>,
    Json(req): Json<UpdateCardRequest>,
) -> Result<Json<CardView>, ApiError> {
    owned_card(&state, &wallet_id, &id).await?;

    let card = state
        .cards
        .update_card(&UpdateBoltCardInput {
            id,
            card_name: req.card_name,
            k0: req.k0,
            k1: req.k1,
            k2: req.k2,
            k3: req.k3,
            k4: req.k4,
            otp: None,
            enabled: req.enabled,
            tx_limit: req.tx_limit,
            daily_limit: req.daily_limit,
        })
        .await?;

    Ok(Json(view(&state, card).await?))
}

async fn set_enabled(
    state: &AppState,
    wallet_id: &str,
    id: &str,
    enabled: bool,
) -> Result<Json<CardView>, ApiError> {
    owned_card(state, wallet_id, id).await?;
    let card = state.cards.enable_disable_card(id, enabled).await?;
    Ok(Json(view(state, card).await?))
}

/// POST /api/cards/{id}/disable
pub async fn disable_card(
    State(state): State<AppState>,
    WalletId(wallet_id): WalletId,
    Path(id): Path<String>,
) -> Result<Json<CardView>, ApiError> {
    set_enabled(&state, &wallet_id, &id, false).await
}

/// POST /api/cards/{id}/enable
pub async fn enable_card(
    State(state): State<AppState>,
    WalletId(wallet_id): WalletId,
    Path(id): Path<String>,
) -> Result<Json<CardView>, ApiError> {
    set_enabled(&state, &wallet_id, &id, true).await
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpResponse {
    pub otp: String,
    pub pairing_url: String,
}

/// POST /api/cards/{id}/otp
/// Issues a single-use pairing code for the card programmer.
pub async fn generate_otp(
    State(state): State<AppState>,
    WalletId(wallet_id): WalletId,
    Path(id): Path<String>,
) -> Result<Json<OtpResponse>, ApiError> {
    owned_card(&state, &wallet_id, &id).await?;
    let otp = state.cards.generate_card_otp(&id).await?;

    let pairing_url = format!(
        "{}/new?a={otp}",
        state.config.public_url.as_str().trim_end_matches('/')
    );
    Ok(Json(OtpResponse { otp, pairing_url }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{send, test_app, zero_key_card};
    use axum::{Router, http::StatusCode};
    use serde_json::{Value, json};

    async fn register(app: &Router, wallet: &str, uid: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/api/cards",
            Some(wallet),
            Some(zero_key_card(uid)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn lists_only_own_cards() {
        let (app, _) = test_app().await;
        register(&app, "w1", "11223344556677").await;
        register(&app, "w1", "11223344556678").await;
        register(&app, "w2", "11223344556679").await;

        let (status, body) = send(&app, "GET", "/api/cards", Some("w1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert!(body[0]["lastUsedAt"].is_null());
        assert_eq!(body[0]["usages"], json!([]));

        let (status, _) = send(&app, "GET", "/api/cards", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn other_wallets_cannot_touch_card() {
        let (app, _) = test_app().await;
        let id = register(&app, "w1", "11223344556677").await;

        for (method, uri, body) in [
            ("GET", format!("/api/cards/{id}"), None),
            ("PATCH", format!("/api/cards/{id}"), Some(json!({"cardName": "Stolen"}))),
            ("POST", format!("/api/cards/{id}/disable"), None),
            ("POST", format!("/api/cards/{id}/otp"), None),
        ] {
            let (status, body) = send(&app, method, &uri, Some("w2"), body).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
            assert_eq!(body["errors"][0]["message"], "Card does not belong to user");
        }

        let (status, _) = send(&app, "GET", "/api/cards/bolt-card:missing", Some("w1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_and_toggle() {
        let (app, _) = test_app().await;
        let id = register(&app, "w1", "11223344556677").await;

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/api/cards/{id}"),
            Some("w1"),
            Some(json!({"cardName": "Lunch", "txLimit": 2000, "dailyLimit": 4000})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cardName"], "Lunch");
        assert_eq!(body["txLimit"], 2000);
        assert_eq!(body["dailyLimit"], 4000);

        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/cards/{id}"),
            Some("w1"),
            Some(json!({"txLimit": 5000})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(
            &app,
            "POST",
            &format!("/api/cards/{id}/disable"),
            Some("w1"),
            None,
        )
        .await;
        assert_eq!(body["enabled"], false);
        let (_, body): (_, Value) = send(
            &app,
            "POST",
            &format!("/api/cards/{id}/enable"),
            Some("w1"),
            None,
        )
        .await;
        assert_eq!(body["enabled"], true);
    }
}
