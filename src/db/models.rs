use anyhow::{Error, Result};
use chrono::{DateTime, Utc};

use crate::cards::{BoltCard, CardUsage};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CardRow {
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
    pub counter: i64,
    pub enabled: bool,
    pub tx_limit: i64,
    pub daily_limit: i64,
    pub otp: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CardRow> for BoltCard {
    type Error = Error;

    fn try_from(row: CardRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            wallet_id: row.wallet_id,
            uid: row.uid,
            card_name: row.card_name,
            k0: row.k0,
            k1: row.k1,
            k2: row.k2,
            k3: row.k3,
            k4: row.k4,
            prev_k0: row.prev_k0,
            prev_k1: row.prev_k1,
            prev_k2: row.prev_k2,
            prev_k3: row.prev_k3,
            prev_k4: row.prev_k4,
            counter: u32::try_from(row.counter)?,
            enabled: row.enabled,
            tx_limit: u64::try_from(row.tx_limit)?,
            daily_limit: u64::try_from(row.daily_limit)?,
            otp: row.otp,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CardUsageRow {
    pub id: String,
    pub card_id: String,
    pub amount: i64,
    pub old_counter: i64,
    pub new_counter: i64,
    pub spent: bool,
    pub spent_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CardUsageRow> for CardUsage {
    type Error = Error;

    fn try_from(row: CardUsageRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            card_id: row.card_id,
            amount: u64::try_from(row.amount)?,
            old_counter: u32::try_from(row.old_counter)?,
            new_counter: u32::try_from(row.new_counter)?,
            spent: row.spent,
            spent_at: row.spent_at,
            ip: row.ip,
            user_agent: row.user_agent,
            created_at: row.created_at,
        })
    }
}
