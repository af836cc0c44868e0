use chrono::Utc;

use super::{
    BoltCard, CardError, CardUsage, CreateBoltCardInput, UpdateBoltCardInput, UsageMeta,
    is_card_id, new_card_id, new_usage_id,
};
use crate::crypto::{AesKey, CardUid};

/// In sats.
pub const DEFAULT_TX_LIMIT: u64 = 100_000;
/// In sats.
pub const DEFAULT_DAILY_LIMIT: u64 = 500_000;

/// Limits applied to new cards that do not name their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDefaults {
    pub tx_limit: u64,
    pub daily_limit: u64,
}

impl Default for LimitDefaults {
    fn default() -> Self {
        Self {
            tx_limit: DEFAULT_TX_LIMIT,
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardLimits {
    pub tx_limit: u64,
    pub daily_limit: u64,
}

fn check_key(name: &str, key: &str) -> Result<(), CardError> {
    AesKey::from_hex(key)
        .map(|_| ())
        .map_err(|_| CardError::invalid(format!("Invalid {name} key format")))
}

fn positive_limit(value: i64, what: &str) -> Result<u64, CardError> {
    if value <= 0 {
        return Err(CardError::invalid(format!("{what} must be greater than 0")));
    }
    Ok(value as u64)
}

fn check_limit_order(tx_limit: u64, daily_limit: u64) -> Result<(), CardError> {
    if tx_limit > daily_limit {
        return Err(CardError::invalid(
            "Transaction limit cannot be greater than daily limit",
        ));
    }
    Ok(())
}

/// Checks a registration request and resolves its limits.
pub fn validate_card_input(
    input: &CreateBoltCardInput,
    defaults: &LimitDefaults,
) -> Result<CardLimits, CardError> {
    if input.wallet_id.is_empty() {
        return Err(CardError::invalid("Wallet ID is required"));
    }
    if input.card_name.trim().is_empty() {
        return Err(CardError::invalid("Card name is required"));
    }
    if input.uid.is_empty() {
        return Err(CardError::invalid("Card UID is required"));
    }
    hex::decode(&input.uid)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| CardUid::from_bytes(&bytes))
        .map_err(|_| CardError::invalid("Invalid card UID format"))?;

    for (name, key) in [
        ("k0", &input.k0),
        ("k1", &input.k1),
        ("k2", &input.k2),
        ("k3", &input.k3),
        ("k4", &input.k4),
    ] {
        check_key(name, key)?;
    }

    let tx_limit = match input.tx_limit {
        Some(v) => positive_limit(v, "Transaction limit")?,
        None => defaults.tx_limit,
    };
    let daily_limit = match input.daily_limit {
        Some(v) => positive_limit(v, "Daily limit")?,
        None => defaults.daily_limit,
    };
    check_limit_order(tx_limit, daily_limit)?;

    Ok(CardLimits {
        tx_limit,
        daily_limit,
    })
}

pub fn validate_card_update_input(input: &UpdateBoltCardInput) -> Result<(), CardError> {
    if input.id.is_empty() {
        return Err(CardError::invalid("Card ID is required"));
    }
    if !is_card_id(&input.id) {
        return Err(CardError::invalid("Invalid card ID format"));
    }
    if input.card_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(CardError::invalid("Card name is required"));
    }

    for (name, key) in [
        ("k0", &input.k0),
        ("k1", &input.k1),
        ("k2", &input.k2),
        ("k3", &input.k3),
        ("k4", &input.k4),
    ] {
        if let Some(key) = key {
            check_key(name, key)?;
        }
    }

    let tx_limit = input
        .tx_limit
        .map(|v| positive_limit(v, "Transaction limit"))
        .transpose()?;
    let daily_limit = input
        .daily_limit
        .map(|v| positive_limit(v, "Daily limit"))
        .transpose()?;
    if let (Some(tx), Some(daily)) = (tx_limit, daily_limit) {
        check_limit_order(tx, daily)?;
    }

    Ok(())
}

/// Builds a new card. `existing` is whatever card already holds the same UID.
pub fn create_card(
    input: &CreateBoltCardInput,
    existing: Option<&BoltCard>,
    defaults: &LimitDefaults,
) -> Result<BoltCard, CardError> {
    let limits = validate_card_input(input, defaults)?;

    let uid = input.uid.to_ascii_uppercase();
    if existing.is_some() {
        return Err(CardError::AlreadyExists(uid));
    }

    let now = Utc::now();
    Ok(BoltCard {
        id: new_card_id(),
        wallet_id: input.wallet_id.clone(),
        uid,
        card_name: input.card_name.trim().to_string(),
        k0: input.k0.clone(),
        k1: input.k1.clone(),
        k2: input.k2.clone(),
        k3: input.k3.clone(),
        k4: input.k4.clone(),
        prev_k0: None,
        prev_k1: None,
        prev_k2: None,
        prev_k3: None,
        prev_k4: None,
        counter: 0,
        enabled: true,
        tx_limit: limits.tx_limit,
        daily_limit: limits.daily_limit,
        otp: None,
        created_at: now,
        updated_at: now,
    })
}

/// Returns the new `(key, previous key)` pair for a possibly rotated key.
fn rotate(
    current: &str,
    prev: &Option<String>,
    replacement: &Option<String>,
) -> (String, Option<String>) {
    match replacement {
        Some(new) if !new.eq_ignore_ascii_case(current) => {
            (new.clone(), Some(current.to_string()))
        }
        _ => (current.to_string(), prev.clone()),
    }
}

/// Applies a partial update. Replaced keys are kept as `prev_kN`.
pub fn update_card(card: &BoltCard, input: &UpdateBoltCardInput) -> Result<BoltCard, CardError> {
    validate_card_update_input(input)?;
    if input.id != card.id {
        return Err(CardError::invalid("Card ID mismatch"));
    }

    let tx_limit = input.tx_limit.map_or(card.tx_limit, |v| v as u64);
    let daily_limit = input.daily_limit.map_or(card.daily_limit, |v| v as u64);
    check_limit_order(tx_limit, daily_limit)?;

    let (k0, prev_k0) = rotate(&card.k0, &card.prev_k0, &input.k0);
    let (k1, prev_k1) = rotate(&card.k1, &card.prev_k1, &input.k1);
    let (k2, prev_k2) = rotate(&card.k2, &card.prev_k2, &input.k2);
    let (k3, prev_k3) = rotate(&card.k3, &card.prev_k3, &input.k3);
    let (k4, prev_k4) = rotate(&card.k4, &card.prev_k4, &input.k4);

    Ok(BoltCard {
        card_name: input
            .card_name
            .as_deref()
            .map_or_else(|| card.card_name.clone(), |n| n.trim().to_string()),
        k0,
        k1,
        k2,
        k3,
        k4,
        prev_k0,
        prev_k1,
        prev_k2,
        prev_k3,
        prev_k4,
        enabled: input.enabled.unwrap_or(card.enabled),
        tx_limit,
        daily_limit,
        otp: input.otp.clone().unwrap_or_else(|| card.otp.clone()),
        updated_at: Utc::now(),
        ..card.clone()
    })
}

/// Checks an amount (sats) against the card state and today's spent usages.
pub fn validate_card_transaction(
    card: &BoltCard,
    amount: u64,
    todays_usages: &[CardUsage],
) -> Result<(), CardError> {
    if !card.enabled {
        return Err(CardError::Disabled);
    }

    if amount > card.tx_limit {
        return Err(CardError::LimitExceeded(format!(
            "Transaction amount ({amount}) exceeds card limit ({})",
            card.tx_limit
        )));
    }

    let used: u64 = todays_usages
        .iter()
        .filter(|u| u.spent)
        .map(|u| u.amount)
        .fold(0, u64::saturating_add);
    let total = used.saturating_add(amount);
    if total > card.daily_limit {
        return Err(CardError::LimitExceeded(format!(
            "Daily limit ({}) would be exceeded: {used} used + {amount} requested = {total}",
            card.daily_limit
        )));
    }

    Ok(())
}

/// Builds an unsaved, unspent usage record.
pub fn create_card_usage(
    card_id: &str,
    amount: u64,
    old_counter: u32,
    new_counter: u32,
    meta: UsageMeta,
) -> CardUsage {
    CardUsage {
        id: new_usage_id(),
        card_id: card_id.to_string(),
        amount,
        old_counter,
        new_counter,
        spent: false,
        spent_at: None,
        ip: meta.ip,
        user_agent: meta.user_agent,
        created_at: Utc::now(),
    }
}
