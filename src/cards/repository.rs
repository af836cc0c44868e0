use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{BoltCard, CardUsage};

/// Raised by repositories when an insert collides with an existing card UID.
#[derive(Debug, thiserror::Error)]
#[error("card uid {0} already registered")]
pub struct DuplicateUid(pub String);

/// Persistence of cards and their usage records.
///
/// The counter, spend and OTP transitions are conditional updates: they
/// report `false` instead of writing when the stored state no longer allows
/// the transition, so concurrent handlers never need an in-process lock.
#[async_trait::async_trait]
pub trait CardRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<BoltCard>>;

    async fn find_by_wallet_id(&self, wallet_id: &str) -> Result<Vec<BoltCard>>;

    async fn find_by_uid(&self, uid: &str) -> Result<Option<BoltCard>>;

    async fn find_by_otp(&self, otp: &str) -> Result<Option<BoltCard>>;

    /// Inserts a new card. Fails with [`DuplicateUid`] on a UID collision.
    async fn save(&self, card: &BoltCard) -> Result<BoltCard>;

    /// Writes the administrative fields of `card`. Never touches the counter.
    async fn update(&self, card: &BoltCard) -> Result<Option<BoltCard>>;

    /// Sets the counter only if `new_counter` is above the stored value.
    async fn advance_counter(&self, card_id: &str, new_counter: u32) -> Result<bool>;

    /// Advances the card counter to `usage.new_counter` and inserts `usage`
    /// in one transaction. The stored usage takes its `old_counter` from the
    /// counter value it replaced. Returns `None`, writing nothing, if the
    /// stored counter is already at or past `usage.new_counter`.
    async fn record_tap(&self, usage: &CardUsage) -> Result<Option<CardUsage>>;

    /// Clears the OTP only if it still equals `otp`.
    async fn clear_otp(&self, card_id: &str, otp: &str) -> Result<bool>;

    /// Newest first.
    async fn find_card_usages_by_card_id(&self, card_id: &str) -> Result<Vec<CardUsage>>;

    async fn find_card_usage_by_id(&self, id: &str) -> Result<Option<CardUsage>>;

    /// Spent usages of the card created at or after `since`.
    async fn get_daily_card_usage(
        &self,
        card_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CardUsage>>;

    async fn record_card_usage(&self, usage: &CardUsage) -> Result<CardUsage>;

    /// Marks the usage spent only if it is currently unspent, `amount` is
    /// within the card's transaction limit, and the card's spent total since
    /// `since` plus `amount` stays within its daily limit. The check and the
    /// write are one statement.
    async fn spend_card_usage(
        &self,
        id: &str,
        amount: u64,
        at: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    /// Reverts a spend. Returns `false` if the usage was not spent.
    async fn unspend_card_usage(&self, id: &str) -> Result<bool>;
}

pub type CardRepositoryPtr = Arc<dyn CardRepository>;
