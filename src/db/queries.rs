use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Pool, Sqlite};

use crate::cards::{BoltCard, CardRepository, CardUsage, DuplicateUid};
use crate::db::models::{CardRow, CardUsageRow};

/// SQLite implementation of [`CardRepository`].
#[derive(Clone)]
pub struct SqliteCardRepository {
    pool: Pool<Sqlite>,
}

impl SqliteCardRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    async fn fetch_card(&self, sql: &str, value: &str) -> Result<Option<BoltCard>> {
        let row = sqlx::query_as::<_, CardRow>(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(BoltCard::try_from).transpose()
    }
}

async fn insert_usage<'e, E>(executor: E, usage: &CardUsage) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO card_usages (id, card_id, amount, old_counter, new_counter, spent,
         spent_at, ip, user_agent, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&usage.id)
    .bind(&usage.card_id)
    .bind(i64::try_from(usage.amount)?)
    .bind(i64::from(usage.old_counter))
    .bind(i64::from(usage.new_counter))
    .bind(usage.spent)
    .bind(usage.spent_at)
    .bind(&usage.ip)
    .bind(&usage.user_agent)
    .bind(usage.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

fn usages(rows: Vec<CardUsageRow>) -> Result<Vec<CardUsage>> {
    rows.into_iter().map(CardUsage::try_from).collect()
}

#[async_trait::async_trait]
impl CardRepository for SqliteCardRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<BoltCard>> {
        self.fetch_card("SELECT * FROM bolt_cards WHERE id = ?", id).await
    }

    async fn find_by_wallet_id(&self, wallet_id: &str) -> Result<Vec<BoltCard>> {
        let rows = sqlx::query_as::<_, CardRow>(
            "SELECT * FROM bolt_cards WHERE wallet_id = ? ORDER BY created_at",
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BoltCard::try_from).collect()
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Option<BoltCard>> {
        self.fetch_card("SELECT * FROM bolt_cards WHERE uid = ?", &uid.to_ascii_uppercase())
            .await
    }

    async fn find_by_otp(&self, otp: &str) -> Result<Option<BoltCard>> {
        self.fetch_card("SELECT * FROM bolt_cards WHERE otp = ?", otp).await
    }

    async fn save(&self, card: &BoltCard) -> Result<BoltCard> {
        let result = sqlx::query(
            "INSERT INTO bolt_cards (id, wallet_id, uid, card_name, k0, k1, k2, k3, k4,
             counter, enabled, tx_limit, daily_limit, otp, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&card.id)
        .bind(&card.wallet_id)
        .bind(&card.uid)
        .bind(&card.card_name)
        .bind(&card.k0)
        .bind(&card.k1)
        .bind(&card.k2)
        .bind(&card.k3)
        .bind(&card.k4)
        .bind(i64::from(card.counter))
        .bind(card.enabled)
        .bind(i64::try_from(card.tx_limit)?)
        .bind(i64::try_from(card.daily_limit)?)
        .bind(&card.otp)
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(card.clone()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DuplicateUid(card.uid.clone()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, card: &BoltCard) -> Result<Option<BoltCard>> {
        let result = sqlx::query(
            "UPDATE bolt_cards SET card_name = ?, k0 = ?, k1 = ?, k2 = ?, k3 = ?, k4 = ?,
             prev_k0 = ?, prev_k1 = ?, prev_k2 = ?, prev_k3 = ?, prev_k4 = ?,
             enabled = ?, tx_limit = ?, daily_limit = ?, otp = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&card.card_name)
        .bind(&card.k0)
        .bind(&card.k1)
        .bind(&card.k2)
        .bind(&card.k3)
        .bind(&card.k4)
        .bind(&card.prev_k0)
        .bind(&card.prev_k1)
        .bind(&card.prev_k2)
        .bind(&card.prev_k3)
        .bind(&card.prev_k4)
        .bind(card.enabled)
        .bind(i64::try_from(card.tx_limit)?)
        .bind(i64::try_from(card.daily_limit)?)
        .bind(&card.otp)
        .bind(card.updated_at)
        .bind(&card.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(&card.id).await
    }

    async fn advance_counter(&self, card_id: &str, new_counter: u32) -> Result<bool> {
        let result = sqlx::query("UPDATE bolt_cards SET counter = ? WHERE id = ? AND counter < ?")
            .bind(i64::from(new_counter))
            .bind(card_id)
            .bind(i64::from(new_counter))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_tap(&self, usage: &CardUsage) -> Result<Option<CardUsage>> {
        let mut tx = self.pool.begin().await?;

        // First write of the transaction: the counter it copies is the one
        // the update below replaces.
        let old_counter: Option<i64> = sqlx::query_scalar(
            "INSERT INTO card_usages (id, card_id, amount, old_counter, new_counter, spent,
             spent_at, ip, user_agent, created_at)
             SELECT ?, id, ?, counter, ?, ?, ?, ?, ?, ?
             FROM bolt_cards WHERE id = ? AND counter < ?
             RETURNING old_counter",
        )
        .bind(&usage.id)
        .bind(i64::try_from(usage.amount)?)
        .bind(i64::from(usage.new_counter))
        .bind(usage.spent)
        .bind(usage.spent_at)
        .bind(&usage.ip)
        .bind(&usage.user_agent)
        .bind(usage.created_at)
        .bind(&usage.card_id)
        .bind(i64::from(usage.new_counter))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(old_counter) = old_counter else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE bolt_cards SET counter = ? WHERE id = ?")
            .bind(i64::from(usage.new_counter))
            .bind(&usage.card_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(CardUsage {
            old_counter: u32::try_from(old_counter)?,
            ..usage.clone()
        }))
    }

    async fn clear_otp(&self, card_id: &str, otp: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE bolt_cards SET otp = NULL, updated_at = ? WHERE id = ? AND otp = ?",
        )
        .bind(Utc::now())
        .bind(card_id)
        .bind(otp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_card_usages_by_card_id(&self, card_id: &str) -> Result<Vec<CardUsage>> {
        let rows = sqlx::query_as::<_, CardUsageRow>(
            "SELECT * FROM card_usages WHERE card_id = ?
             ORDER BY created_at DESC, new_counter DESC",
        )
        .bind(card_id)
        .fetch_all(&self.pool)
        .await?;

        usages(rows)
    }

    async fn find_card_usage_by_id(&self, id: &str) -> Result<Option<CardUsage>> {
        let row = sqlx::query_as::<_, CardUsageRow>("SELECT * FROM card_usages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CardUsage::try_from).transpose()
    }

    async fn get_daily_card_usage(
        &self,
        card_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CardUsage>> {
        let rows = sqlx::query_as::<_, CardUsageRow>(
            "SELECT * FROM card_usages WHERE card_id = ? AND spent = 1 AND created_at >= ?",
        )
        .bind(card_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        usages(rows)
    }

    async fn record_card_usage(&self, usage: &CardUsage) -> Result<CardUsage> {
        insert_usage(&self.pool, usage).await?;
        Ok(usage.clone())
    }

    async fn spend_card_usage(
        &self,
        id: &str,
        amount: u64,
        at: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let amount = i64::try_from(amount)?;
        let result = sqlx::query(
            "UPDATE card_usages SET spent = 1, spent_at = ?, amount = ?
             WHERE id = ? AND spent = 0 AND EXISTS (
                 SELECT 1 FROM bolt_cards AS card
                 WHERE card.id = card_usages.card_id
                   AND ? <= card.tx_limit
                   AND ? + (
                       SELECT COALESCE(SUM(today.amount), 0) FROM card_usages AS today
                       WHERE today.card_id = card.id AND today.spent = 1
                         AND today.created_at >= ?
                   ) <= card.daily_limit
             )",
        )
        .bind(at)
        .bind(amount)
        .bind(id)
        .bind(amount)
        .bind(amount)
        .bind(since)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unspend_card_usage(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE card_usages SET spent = 0, spent_at = NULL WHERE id = ? AND spent = 1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
