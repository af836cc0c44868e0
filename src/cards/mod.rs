//! Bolt Card domain: records, invariants and the persistence seam.

mod error;
pub mod repository;
pub mod rules;

use chrono::{DateTime, Utc};

pub use error::CardError;
pub use repository::{CardRepository, CardRepositoryPtr, DuplicateUid};
pub use rules::{
    DEFAULT_DAILY_LIMIT, DEFAULT_TX_LIMIT, LimitDefaults, create_card, create_card_usage,
    update_card, validate_card_input, validate_card_transaction, validate_card_update_input,
};

pub const CARD_ID_PREFIX: &str = "bolt-card:";
pub const USAGE_ID_PREFIX: &str = "bolt-card-usage:";

/// A registered physical card.
#[derive(Debug, Clone, PartialEq)]
pub struct BoltCard {
    pub id: String,
    pub wallet_id: String,
    pub uid: String,
    pub card_name: String,
    pub k0: String,
    pub k1: String,
    pub k2: String,
    pub k3: String,
    pub k4: String,
    pub prev_k0: Option<String>,
    pub prev_k1: Option<String>,
    pub prev_k2: Option<String>,
    pub prev_k3: Option<String>,
    pub prev_k4: Option<String>,
    pub counter: u32,
    pub enabled: bool,
    pub tx_limit: u64,
    pub daily_limit: u64,
    pub otp: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One authorization (withdraw request) and its redemption (callback).
#[derive(Debug, Clone, PartialEq)]
pub struct CardUsage {
    pub id: String,
    pub card_id: String,
    /// Sats; zero until the callback names an invoice.
    pub amount: u64,
    pub old_counter: u32,
    pub new_counter: u32,
    pub spent: bool,
    pub spent_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CardUsage {
    /// A usage that was spent and then reverted after a failed payment.
    pub fn is_rolled_back(&self) -> bool {
        !self.spent && self.amount > 0
    }
}

/// Request provenance recorded on each usage. Diagnostic only.
#[derive(Debug, Clone, Default)]
pub struct UsageMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateBoltCardInput {
    pub wallet_id: String,
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

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateBoltCardInput {
    pub id: String,
    pub card_name: Option<String>,
    pub k0: Option<String>,
    pub k1: Option<String>,
    pub k2: Option<String>,
    pub k3: Option<String>,
    pub k4: Option<String>,
    /// `Some(None)` clears the OTP.
    pub otp: Option<Option<String>>,
    pub enabled: Option<bool>,
    pub tx_limit: Option<i64>,
    pub daily_limit: Option<i64>,
}

pub(crate) fn random_token(prefix: &str) -> String {
    format!("{prefix}{}", hex::encode(rand::random::<[u8; 16]>()))
}

pub fn new_card_id() -> String {
    random_token(CARD_ID_PREFIX)
}

pub fn new_usage_id() -> String {
    random_token(USAGE_ID_PREFIX)
}

pub fn is_card_id(id: &str) -> bool {
    id.strip_prefix(CARD_ID_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Registration input with zero keys except the SUN keys under test.
#[cfg(test)]
pub(crate) fn test_input(wallet_id: &str, uid: &str, k1: &str, k2: &str) -> CreateBoltCardInput {
    let zero = "0".repeat(32);
    CreateBoltCardInput {
        wallet_id: wallet_id.to_string(),
        card_name: "Test Card".to_string(),
        uid: uid.to_string(),
        k0: zero.clone(),
        k1: k1.to_string(),
        k2: k2.to_string(),
        k3: zero.clone(),
        k4: zero,
        tx_limit: Some(100_000),
        daily_limit: Some(500_000),
    }
}
