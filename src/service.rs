use chrono::{DateTime, Local, NaiveTime, Utc};

use crate::cards::{
    self, BoltCard, CardError, CardRepositoryPtr, CardUsage, CreateBoltCardInput, DuplicateUid,
    LimitDefaults, UpdateBoltCardInput, UsageMeta,
};

/// Start of the current local calendar day, the daily-limit window.
pub fn start_of_local_day() -> DateTime<Utc> {
    let midnight = Local::now().date_naive().and_time(NaiveTime::MIN);
    midnight
        .and_local_timezone(Local)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// Card lifecycle, pairing and usage accounting over a [`CardRepository`].
///
/// The only component that writes card or usage state.
///
/// [`CardRepository`]: crate::cards::CardRepository
pub struct BoltCardService {
    repo: CardRepositoryPtr,
    defaults: LimitDefaults,
}

impl BoltCardService {
    pub fn new(repo: CardRepositoryPtr, defaults: LimitDefaults) -> Self {
        Self { repo, defaults }
    }

    pub async fn find_card_by_id(&self, id: &str) -> Result<Option<BoltCard>, CardError> {
        Ok(self.repo.find_by_id(id).await?)
    }

    pub async fn find_cards_by_wallet_id(
        &self,
        wallet_id: &str,
    ) -> Result<Vec<BoltCard>, CardError> {
        Ok(self.repo.find_by_wallet_id(wallet_id).await?)
    }

    pub async fn find_card_by_uid(&self, uid: &str) -> Result<Option<BoltCard>, CardError> {
        Ok(self.repo.find_by_uid(uid).await?)
    }

    pub async fn find_card_by_otp(&self, otp: &str) -> Result<Option<BoltCard>, CardError> {
        Ok(self.repo.find_by_otp(otp).await?)
    }

    async fn load(&self, id: &str) -> Result<BoltCard, CardError> {
        self.repo.find_by_id(id).await?.ok_or(CardError::NotFound)
    }

    pub async fn create_card(&self, input: &CreateBoltCardInput) -> Result<BoltCard, CardError> {
        let existing = self.find_card_by_uid(&input.uid).await?;
        let card = cards::create_card(input, existing.as_ref(), &self.defaults)?;

        let saved = self.repo.save(&card).await.map_err(|e| match e.downcast::<DuplicateUid>() {
            Ok(DuplicateUid(uid)) => CardError::AlreadyExists(uid),
            Err(e) => CardError::Repository(e),
        })?;

        tracing::info!(card_id = %saved.id, wallet_id = %saved.wallet_id, "bolt card registered");
        Ok(saved)
    }

    pub async fn update_card(&self, input: &UpdateBoltCardInput) -> Result<BoltCard, CardError> {
        cards::validate_card_update_input(input)?;
        let existing = self.load(&input.id).await?;
        let updated = cards::update_card(&existing, input)?;

        self.repo.update(&updated).await?.ok_or(CardError::NotFound)
    }

    pub async fn enable_disable_card(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<BoltCard, CardError> {
        let card = self
            .update_card(&UpdateBoltCardInput {
                id: id.to_string(),
                enabled: Some(enabled),
                ..Default::default()
            })
            .await?;

        tracing::info!(card_id = %id, enabled, "bolt card state changed");
        Ok(card)
    }

    /// Moves the counter forward. The sole gate against counter replay.
    pub async fn update_card_counter(
        &self,
        card_id: &str,
        new_counter: u32,
    ) -> Result<(), CardError> {
        let card = self.load(card_id).await?;
        if new_counter <= card.counter {
            return Err(CardError::CounterNotAdvanced { current: card.counter });
        }

        if !self.repo.advance_counter(card_id, new_counter).await? {
            // Lost a race with a concurrent tap.
            let current = self.load(card_id).await?.counter;
            return Err(CardError::CounterNotAdvanced { current });
        }
        Ok(())
    }

    /// Advances the counter to `new_counter` and records the pending usage
    /// that authorizes one withdrawal, as a single atomic step.
    pub async fn authorize_tap(
        &self,
        card: &BoltCard,
        new_counter: u32,
        meta: UsageMeta,
    ) -> Result<CardUsage, CardError> {
        if new_counter <= card.counter {
            return Err(CardError::CounterNotAdvanced { current: card.counter });
        }

        let pending = cards::create_card_usage(&card.id, 0, card.counter, new_counter, meta);
        let Some(usage) = self.repo.record_tap(&pending).await? else {
            let current = self.load(&card.id).await?.counter;
            return Err(CardError::CounterNotAdvanced { current });
        };

        tracing::debug!(
            card_id = %card.id,
            usage_id = %usage.id,
            old_counter = usage.old_counter,
            new_counter,
            "card counter advanced"
        );
        Ok(usage)
    }

    /// Issues a fresh pairing OTP, replacing any previous one.
    pub async fn generate_card_otp(&self, card_id: &str) -> Result<String, CardError> {
        let otp = hex::encode(rand::random::<[u8; 16]>());
        self.update_card(&UpdateBoltCardInput {
            id: card_id.to_string(),
            otp: Some(Some(otp.clone())),
            ..Default::default()
        })
        .await?;

        Ok(otp)
    }

    /// Clears `otp` from the card if it is still the current one.
    pub async fn clear_card_otp(&self, card_id: &str, otp: &str) -> Result<bool, CardError> {
        Ok(self.repo.clear_otp(card_id, otp).await?)
    }

    /// Redeems a pairing OTP. Succeeds at most once per OTP.
    pub async fn pair_card(&self, otp: &str) -> Result<BoltCard, CardError> {
        if otp.is_empty() {
            return Err(CardError::NotFound);
        }
        let card = self.repo.find_by_otp(otp).await?.ok_or(CardError::NotFound)?;

        if !self.clear_card_otp(&card.id, otp).await? {
            return Err(CardError::NotFound);
        }

        tracing::info!(card_id = %card.id, "bolt card paired");
        Ok(BoltCard { otp: None, ..card })
    }

    /// All usages of the card, newest first.
    pub async fn get_card_usage(&self, card_id: &str) -> Result<Vec<CardUsage>, CardError> {
        Ok(self.repo.find_card_usages_by_card_id(card_id).await?)
    }

    pub async fn record_card_usage(&self, usage: &CardUsage) -> Result<CardUsage, CardError> {
        Ok(self.repo.record_card_usage(usage).await?)
    }

    pub async fn find_card_usage_by_id(&self, id: &str) -> Result<Option<CardUsage>, CardError> {
        Ok(self.repo.find_card_usage_by_id(id).await?)
    }

    /// Spent usages created since local midnight.
    pub async fn get_daily_card_usage(&self, card_id: &str) -> Result<Vec<CardUsage>, CardError> {
        Ok(self
            .repo
            .get_daily_card_usage(card_id, start_of_local_day())
            .await?)
    }

    /// Marks a usage spent for `amount` sats within the card's transaction
    /// and daily limits. Limits and spend are settled by one conditional
    /// write, so concurrent spends on the same card cannot overshoot the day.
    pub async fn spend_card_usage(&self, usage_id: &str, amount: u64) -> Result<(), CardError> {
        let since = start_of_local_day();
        if self
            .repo
            .spend_card_usage(usage_id, amount, Utc::now(), since)
            .await?
        {
            return Ok(());
        }

        let usage = self
            .repo
            .find_card_usage_by_id(usage_id)
            .await?
            .ok_or(CardError::UsageNotFound)?;
        if usage.spent {
            return Err(CardError::AlreadySpent);
        }

        let card = self.load(&usage.card_id).await?;
        let todays = self.repo.get_daily_card_usage(&card.id, since).await?;
        cards::validate_card_transaction(&card, amount, &todays)?;
        // A concurrent rollback freed room after the write was refused.
        Err(CardError::LimitExceeded(format!(
            "Daily limit ({}) would be exceeded",
            card.daily_limit
        )))
    }

    /// Reverts a spend after the payment behind it failed.
    pub async fn unspend_card_usage(&self, usage_id: &str) -> Result<bool, CardError> {
        Ok(self.repo.unspend_card_usage(usage_id).await?)
    }
}
