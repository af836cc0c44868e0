//! LNURL-withdraw flow for a card tap.
//!
//! A tap is redeemed in two calls. The request authenticates the SUN
//! parameters, advances the card counter and hands out a usage id (`k1`).
//! The callback redeems that usage against a BOLT11 invoice: it reserves the
//! usage, pays, and reverts the reservation if the payment fails. The counter
//! is never rolled back.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::{
    cards::{BoltCard, CardError, CardUsage, UsageMeta, is_card_id},
    lightning::{PaymentGatewayPtr, WalletOwnersPtr},
    service::BoltCardService,
    validation::{AuthFailure, TapParams, authenticate_tap},
};

/// Smallest amount a wallet may withdraw, in millisats.
pub const MIN_WITHDRAWABLE_MSATS: u64 = 1000;

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(AuthFailure),

    #[error("card not found")]
    CardNotFound,

    #[error("card is disabled")]
    CardDisabled,

    #[error("counter replay, card is at {current}")]
    ReplayDetected { current: u32 },

    #[error("usage not found")]
    RecordNotFound,

    #[error("usage already claimed")]
    AlreadyClaimed,

    #[error("invalid payment request: {0}")]
    InvalidPaymentRequest(String),

    #[error("{0}")]
    LimitExceeded(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WithdrawError {
    /// The message shown to the wallet. Authentication and replay failures
    /// share one message.
    pub fn public_message(&self) -> String {
        match self {
            Self::AuthenticationFailed(_) | Self::ReplayDetected { .. } => {
                "Card authentication failed".into()
            }
            Self::CardNotFound => "Card not found".into(),
            Self::CardDisabled => "Card is disabled".into(),
            Self::RecordNotFound => "Record not found for this charge (invalid k1)".into(),
            Self::AlreadyClaimed => "Payment already claimed".into(),
            Self::InvalidPaymentRequest(_) => "Failed to decode payment request".into(),
            Self::LimitExceeded(reason) => reason.clone(),
            Self::PaymentFailed(_) => "Payment failed".into(),
            Self::Internal(_) => "Unexpected error".into(),
        }
    }
}

impl From<CardError> for WithdrawError {
    fn from(err: CardError) -> Self {
        match err {
            CardError::Disabled => Self::CardDisabled,
            CardError::NotFound => Self::CardNotFound,
            CardError::UsageNotFound => Self::RecordNotFound,
            CardError::AlreadySpent => Self::AlreadyClaimed,
            CardError::CounterNotAdvanced { current } => Self::ReplayDetected { current },
            CardError::LimitExceeded(reason) => Self::LimitExceeded(reason),
            CardError::Repository(e) => Self::Internal(e),
            err @ (CardError::Invalid(_) | CardError::AlreadyExists(_)) => {
                Self::Internal(anyhow::anyhow!(err.to_string()))
            }
        }
    }
}

/// LUD-03 `withdrawRequest` body.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequestResponse {
    pub tag: String,
    pub callback: String,
    pub k1: String,
    pub default_description: String,
    pub min_withdrawable: u64,
    pub max_withdrawable: u64,
}

#[derive(Debug, Clone)]
pub struct WithdrawSettings {
    /// Externally visible base URL, e.g. `https://cards.example.com`.
    pub public_url: String,
    pub description: String,
    /// Let a usage whose payment failed be redeemed again with the same `k1`.
    pub allow_retry_after_rollback: bool,
}

impl WithdrawSettings {
    pub fn callback_url(&self, k1: &str) -> String {
        format!(
            "{}/api/lnurl/withdraw/callback/{k1}",
            self.public_url.trim_end_matches('/')
        )
    }
}

pub struct WithdrawHandler {
    service: Arc<BoltCardService>,
    gateway: PaymentGatewayPtr,
    owners: WalletOwnersPtr,
    settings: WithdrawSettings,
}

impl WithdrawHandler {
    pub fn new(
        service: Arc<BoltCardService>,
        gateway: PaymentGatewayPtr,
        owners: WalletOwnersPtr,
        settings: WithdrawSettings,
    ) -> Self {
        Self {
            service,
            gateway,
            owners,
            settings,
        }
    }

    /// Authenticates a tap and authorizes one withdrawal.
    pub async fn request(
        &self,
        card_id: &str,
        p: &str,
        c: &str,
        meta: UsageMeta,
    ) -> Result<WithdrawRequestResponse, WithdrawError> {
        let tap = TapParams::from_hex(p, c).map_err(|reason| auth_failed(card_id, reason))?;

        if !is_card_id(card_id) {
            return Err(WithdrawError::CardNotFound);
        }
        let card = self
            .service
            .find_card_by_id(card_id)
            .await?
            .ok_or(WithdrawError::CardNotFound)?;

        let auth = authenticate_tap(&card, &tap).map_err(|reason| auth_failed(card_id, reason))?;
        if auth.used_previous_keys {
            tracing::info!(card_id, "tap authenticated with previous keys");
        }

        let counter = auth.counter.value();
        tracing::debug!(card_id, uid = %auth.uid, counter, "tap authenticated");
        if counter <= card.counter {
            tracing::warn!(card_id, counter, current = card.counter, "counter replay rejected");
            return Err(WithdrawError::ReplayDetected {
                current: card.counter,
            });
        }

        if !card.enabled {
            return Err(WithdrawError::CardDisabled);
        }

        let usage = self
            .service
            .authorize_tap(&card, counter, meta)
            .await
            .inspect_err(|e| {
                if let CardError::CounterNotAdvanced { current } = e {
                    tracing::warn!(card_id, counter, current, "concurrent tap won the counter");
                }
            })?;

        let spent_today = spent_total(&self.service.get_daily_card_usage(&card.id).await?);
        if spent_today >= card.daily_limit {
            return Err(WithdrawError::LimitExceeded(format!(
                "Daily limit ({}) reached",
                card.daily_limit
            )));
        }

        Ok(WithdrawRequestResponse {
            tag: "withdrawRequest".to_string(),
            callback: self.settings.callback_url(&usage.id),
            k1: usage.id,
            default_description: self.settings.description.clone(),
            min_withdrawable: MIN_WITHDRAWABLE_MSATS,
            max_withdrawable: card.tx_limit.saturating_mul(1000),
        })
    }

    /// Redeems the usage `k1` by paying `pr`.
    pub async fn callback(&self, k1: &str, pr: &str) -> Result<(), WithdrawError> {
        let usage = self
            .service
            .find_card_usage_by_id(k1)
            .await?
            .ok_or(WithdrawError::RecordNotFound)?;

        if usage.spent || (usage.is_rolled_back() && !self.settings.allow_retry_after_rollback) {
            return Err(WithdrawError::AlreadyClaimed);
        }

        let card = self
            .service
            .find_card_by_id(&usage.card_id)
            .await?
            .ok_or(WithdrawError::CardNotFound)?;
        if !card.enabled {
            return Err(WithdrawError::CardDisabled);
        }

        let invoice = self.gateway.decode_invoice(pr).await.map_err(|e| {
            tracing::debug!(usage_id = %usage.id, error = %e, "undecodable payment request");
            WithdrawError::InvalidPaymentRequest(e.to_string())
        })?;
        let amount = invoice.amount_sats();

        self.service.spend_card_usage(&usage.id, amount).await?;
        tracing::debug!(usage_id = %usage.id, amount, "usage reserved");

        match self.pay(&card, &usage, pr).await {
            Ok(()) => {
                tracing::info!(
                    card_id = %card.id,
                    usage_id = %usage.id,
                    payment_hash = %invoice.payment_hash,
                    amount,
                    "card payment sent"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    usage_id = %usage.id,
                    error = %e,
                    "payment failed, rolling back usage"
                );
                if let Err(rollback) = self.service.unspend_card_usage(&usage.id).await {
                    tracing::error!(
                        usage_id = %usage.id,
                        error = %rollback,
                        "usage rollback failed"
                    );
                }
                Err(WithdrawError::PaymentFailed(e.to_string()))
            }
        }
    }

    async fn pay(&self, card: &BoltCard, usage: &CardUsage, pr: &str) -> anyhow::Result<()> {
        let owner = self
            .owners
            .find_owner(&card.wallet_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no owner for wallet {}", card.wallet_id))?;

        let result = self
            .gateway
            .pay_invoice(pr, &owner.wallet_id, &owner.user_id)
            .await?;
        if !result.success {
            anyhow::bail!(
                "{}",
                result.error.unwrap_or_else(|| format!("payment for {} declined", usage.id))
            );
        }
        Ok(())
    }
}

fn auth_failed(card_id: &str, reason: AuthFailure) -> WithdrawError {
    tracing::warn!(card_id, %reason, "tap authentication failed");
    WithdrawError::AuthenticationFailed(reason)
}

fn spent_total(usages: &[CardUsage]) -> u64 {
    usages
        .iter()
        .filter(|u| u.spent)
        .map(|u| u.amount)
        .fold(0, u64::saturating_add)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cards::{LimitDefaults, test_input};
    use crate::crypto::simulate_tap;
    use crate::db::{SqliteCardRepository, test_pool};
    use crate::cards::UpdateBoltCardInput;
    use crate::lightning::tests::{COFFEE_INVOICE, DONATION_INVOICE};
    use crate::lightning::{
        DecodedInvoice, Invoice, PaymentGateway, PaymentResult, StaticWalletOwners, WalletOwner,
    };
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) const UID: [u8; 7] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
    pub(crate) const K1: [u8; 16] = [0xa1; 16];
    pub(crate) const K2: [u8; 16] = [0xb2; 16];

    /// Decodes `lntest<msats>` (anything else as BOLT11) and records every
    /// payment.
    #[derive(Default)]
    pub(crate) struct FakeGateway {
        pub fail: AtomicBool,
        pub paid: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeGateway {
        pub fn payments(&self) -> usize {
            self.paid.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn decode_invoice(&self, payment_request: &str) -> Result<DecodedInvoice> {
            let Some(msats) = payment_request.strip_prefix("lntest") else {
                return DecodedInvoice::try_from(&Invoice::from_str(payment_request)?);
            };
            let amount_msats = msats.parse().map_err(|_| anyhow!("bad invoice"))?;
            Ok(DecodedInvoice {
                amount_msats,
                payment_hash: "00".repeat(32),
            })
        }

        async fn pay_invoice(
            &self,
            payment_request: &str,
            wallet_id: &str,
            user_id: &str,
        ) -> Result<PaymentResult> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("no route"));
            }
            self.paid.lock().unwrap().push((
                payment_request.to_string(),
                wallet_id.to_string(),
                user_id.to_string(),
            ));
            Ok(PaymentResult {
                success: true,
                error: None,
            })
        }
    }

    pub(crate) fn settings() -> WithdrawSettings {
        WithdrawSettings {
            public_url: "https://cards.example.com/".into(),
            description: "Bolt Card Payment".into(),
            allow_retry_after_rollback: true,
        }
    }

    pub(crate) async fn setup(
        settings: WithdrawSettings,
    ) -> (Arc<BoltCardService>, Arc<FakeGateway>, WithdrawHandler, BoltCard) {
        let repo = SqliteCardRepository::new(test_pool().await);
        let service = Arc::new(BoltCardService::new(Arc::new(repo), LimitDefaults::default()));
        let card = service
            .create_card(&test_input(
                "wallet-public",
                &hex::encode(UID),
                &hex::encode(K1),
                &hex::encode(K2),
            ))
            .await
            .unwrap();

        let gateway = Arc::new(FakeGateway::default());
        let owners = StaticWalletOwners::default().with_owner(
            "wallet-public",
            WalletOwner {
                wallet_id: "wallet-internal".into(),
                user_id: "user-1".into(),
            },
        );
        let handler =
            WithdrawHandler::new(service.clone(), gateway.clone(), Arc::new(owners), settings);
        (service, gateway, handler, card)
    }

    async fn tap(
        handler: &WithdrawHandler,
        card: &BoltCard,
        counter: u32,
    ) -> Result<WithdrawRequestResponse, WithdrawError> {
        let (p, c) = simulate_tap(&UID, counter, &K1, &K2);
        handler.request(&card.id, &p, &c, UsageMeta::default()).await
    }

    async fn counter_of(service: &BoltCardService, card: &BoltCard) -> u32 {
        service.find_card_by_id(&card.id).await.unwrap().unwrap().counter
    }

    #[tokio::test]
    async fn request_authorizes_tap() {
        let (service, _, handler, card) = setup(settings()).await;

        let response = tap(&handler, &card, 1).await.unwrap();
        assert_eq!(response.tag, "withdrawRequest");
        assert_eq!(response.min_withdrawable, 1000);
        assert_eq!(response.max_withdrawable, 100_000_000);
        assert_eq!(response.default_description, "Bolt Card Payment");
        assert_eq!(
            response.callback,
            format!("https://cards.example.com/api/lnurl/withdraw/callback/{}", response.k1)
        );
        assert_eq!(counter_of(&service, &card).await, 1);

        let usage = service.find_card_usage_by_id(&response.k1).await.unwrap().unwrap();
        assert_eq!((usage.amount, usage.old_counter, usage.new_counter), (0, 0, 1));
        assert!(!usage.spent);
    }

    #[tokio::test]
    async fn replayed_tap_is_rejected() {
        let (service, _, handler, card) = setup(settings()).await;
        let (p, c) = simulate_tap(&UID, 1, &K1, &K2);

        handler.request(&card.id, &p, &c, UsageMeta::default()).await.unwrap();
        let err = handler.request(&card.id, &p, &c, UsageMeta::default()).await.unwrap_err();

        assert!(matches!(err, WithdrawError::ReplayDetected { current: 1 }));
        assert_eq!(err.public_message(), "Card authentication failed");
        assert_eq!(counter_of(&service, &card).await, 1);
        assert_eq!(service.get_card_usage(&card.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_taps_share_one_message() {
        let (service, _, handler, card) = setup(settings()).await;
        let (p, c) = simulate_tap(&UID, 1, &K1, &K2);
        let (wrong_p, wrong_c) = simulate_tap(&UID, 1, &[0x01; 16], &[0x02; 16]);

        let failures = [
            handler.request(&card.id, "zz", &c, UsageMeta::default()).await,
            handler.request(&card.id, &p[..16], &c, UsageMeta::default()).await,
            handler.request(&card.id, &wrong_p, &wrong_c, UsageMeta::default()).await,
            handler.request(&card.id, &p, &wrong_c, UsageMeta::default()).await,
        ];
        for result in failures {
            let err = result.unwrap_err();
            assert!(matches!(err, WithdrawError::AuthenticationFailed(_)), "{err:?}");
            assert_eq!(err.public_message(), "Card authentication failed");
        }
        assert_eq!(counter_of(&service, &card).await, 0);
    }

    #[tokio::test]
    async fn unknown_and_disabled_cards() {
        let (service, _, handler, card) = setup(settings()).await;
        let (p, c) = simulate_tap(&UID, 1, &K1, &K2);

        assert!(matches!(
            handler.request("bolt-card:missing", &p, &c, UsageMeta::default()).await,
            Err(WithdrawError::CardNotFound)
        ));

        service.enable_disable_card(&card.id, false).await.unwrap();
        assert!(matches!(
            handler.request(&card.id, &p, &c, UsageMeta::default()).await,
            Err(WithdrawError::CardDisabled)
        ));
        assert_eq!(counter_of(&service, &card).await, 0);
    }

    #[tokio::test]
    async fn callback_pays_once() {
        let (service, gateway, handler, card) = setup(settings()).await;
        let k1 = tap(&handler, &card, 1).await.unwrap().k1;

        handler.callback(&k1, "lntest5000000").await.unwrap();
        {
            let paid = gateway.paid.lock().unwrap();
            assert_eq!(
                paid.as_slice(),
                [(
                    "lntest5000000".to_string(),
                    "wallet-internal".to_string(),
                    "user-1".to_string()
                )]
            );
        }
        let usage = service.find_card_usage_by_id(&k1).await.unwrap().unwrap();
        assert!(usage.spent);
        assert_eq!(usage.amount, 5000);
        assert!(usage.spent_at.is_some());

        let err = handler.callback(&k1, "lntest5000000").await.unwrap_err();
        assert!(matches!(err, WithdrawError::AlreadyClaimed));
        assert_eq!(gateway.payments(), 1);
    }

    #[tokio::test]
    async fn failed_payment_rolls_back_usage_only() {
        let (service, gateway, handler, card) = setup(settings()).await;
        let k1 = tap(&handler, &card, 1).await.unwrap().k1;

        gateway.fail.store(true, Ordering::SeqCst);
        let err = handler.callback(&k1, "lntest5000000").await.unwrap_err();
        assert!(matches!(err, WithdrawError::PaymentFailed(_)));
        assert_eq!(err.public_message(), "Payment failed");

        let usage = service.find_card_usage_by_id(&k1).await.unwrap().unwrap();
        assert!(!usage.spent);
        assert!(usage.spent_at.is_none());
        assert_eq!(counter_of(&service, &card).await, 1);
        assert!(service.get_daily_card_usage(&card.id).await.unwrap().is_empty());

        gateway.fail.store(false, Ordering::SeqCst);
        handler.callback(&k1, "lntest5000000").await.unwrap();
        assert_eq!(gateway.payments(), 1);
        assert_eq!(counter_of(&service, &card).await, 1);
    }

    #[tokio::test]
    async fn rolled_back_usage_is_abandoned_when_retry_disabled() {
        let (service, gateway, handler, card) = setup(WithdrawSettings {
            allow_retry_after_rollback: false,
            ..settings()
        })
        .await;
        let k1 = tap(&handler, &card, 1).await.unwrap().k1;

        gateway.fail.store(true, Ordering::SeqCst);
        assert!(handler.callback(&k1, "lntest5000000").await.is_err());
        gateway.fail.store(false, Ordering::SeqCst);

        assert!(matches!(
            handler.callback(&k1, "lntest5000000").await,
            Err(WithdrawError::AlreadyClaimed)
        ));
        assert_eq!(gateway.payments(), 0);
        assert!(!service.find_card_usage_by_id(&k1).await.unwrap().unwrap().spent);

        let fresh = tap(&handler, &card, 2).await.unwrap().k1;
        handler.callback(&fresh, "lntest5000000").await.unwrap();
        assert_eq!(gateway.payments(), 1);
    }

    #[tokio::test]
    async fn concurrent_callbacks_pay_once() {
        let (_, gateway, handler, card) = setup(settings()).await;
        let k1 = tap(&handler, &card, 1).await.unwrap().k1;

        let (a, b) = tokio::join!(
            handler.callback(&k1, "lntest1000000"),
            handler.callback(&k1, "lntest1000000")
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(a.err().or(b.err()), Some(WithdrawError::AlreadyClaimed)));
        assert_eq!(gateway.payments(), 1);
    }

    #[tokio::test]
    async fn callback_enforces_limits() {
        let (service, gateway, handler, card) = setup(settings()).await;

        let k1 = tap(&handler, &card, 1).await.unwrap().k1;
        assert!(matches!(
            handler.callback(&k1, "lntest100000001").await,
            Err(WithdrawError::LimitExceeded(_))
        ));
        assert!(!service.find_card_usage_by_id(&k1).await.unwrap().unwrap().spent);

        for counter in 2..=6 {
            let k1 = tap(&handler, &card, counter).await.unwrap().k1;
            handler.callback(&k1, "lntest100000000").await.unwrap();
        }
        assert_eq!(gateway.payments(), 5);

        // 500_000 of 500_000 spent: the next tap is refused at request time.
        assert!(matches!(
            tap(&handler, &card, 7).await,
            Err(WithdrawError::LimitExceeded(_))
        ));
        assert_eq!(counter_of(&service, &card).await, 7);
    }

    #[tokio::test]
    async fn callback_daily_limit_counts_spent_usages() {
        let (_, gateway, handler, card) = setup(settings()).await;

        let first = tap(&handler, &card, 1).await.unwrap().k1;
        let second = tap(&handler, &card, 2).await.unwrap().k1;
        handler.callback(&first, "lntest100000000").await.unwrap();
        for counter in 3..=6 {
            let k1 = tap(&handler, &card, counter).await.unwrap().k1;
            handler.callback(&k1, "lntest99000000").await.unwrap();
        }

        // 496_000 spent; 5_000 more would pass tx_limit but not daily_limit.
        assert!(matches!(
            handler.callback(&second, "lntest5000000").await,
            Err(WithdrawError::LimitExceeded(_))
        ));
        handler.callback(&second, "lntest4000000").await.unwrap();
        assert_eq!(gateway.payments(), 6);
    }

    #[tokio::test]
    async fn concurrent_callbacks_respect_daily_limit() {
        let (service, gateway, handler, card) = setup(settings()).await;
        for counter in 1..=4 {
            let k1 = tap(&handler, &card, counter).await.unwrap().k1;
            handler.callback(&k1, "lntest100000000").await.unwrap();
        }

        // 400_000 of 500_000 spent; room for exactly one more 100_000.
        let a = tap(&handler, &card, 5).await.unwrap().k1;
        let b = tap(&handler, &card, 6).await.unwrap().k1;
        let (a, b) = tokio::join!(
            handler.callback(&a, "lntest100000000"),
            handler.callback(&b, "lntest100000000")
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(a.err().or(b.err()), Some(WithdrawError::LimitExceeded(_))));
        assert_eq!(gateway.payments(), 5);
        let spent_today = spent_total(&service.get_daily_card_usage(&card.id).await.unwrap());
        assert_eq!(spent_today, card.daily_limit);
    }

    #[tokio::test]
    async fn concurrent_taps_get_disjoint_counter_brackets() {
        let (service, _, handler, card) = setup(settings()).await;

        let (a, b) = tokio::join!(tap(&handler, &card, 1), tap(&handler, &card, 2));
        let mut brackets = Vec::new();
        for response in [a, b].into_iter().flatten() {
            let usage = service.find_card_usage_by_id(&response.k1).await.unwrap().unwrap();
            brackets.push((usage.old_counter, usage.new_counter));
        }
        brackets.sort();

        assert!(!brackets.is_empty());
        assert!(brackets.windows(2).all(|w| w[0].1 <= w[1].0), "{brackets:?}");
        assert_eq!(counter_of(&service, &card).await, 2);
    }

    #[tokio::test]
    async fn callback_pays_signed_invoice_in_sats() {
        let (service, gateway, handler, card) = setup(settings()).await;
        let k1 = tap(&handler, &card, 1).await.unwrap().k1;

        let err = handler.callback(&k1, DONATION_INVOICE).await.unwrap_err();
        assert!(matches!(err, WithdrawError::InvalidPaymentRequest(_)));

        // 250_000 sats is over the default 100_000 transaction limit.
        assert!(matches!(
            handler.callback(&k1, COFFEE_INVOICE).await,
            Err(WithdrawError::LimitExceeded(_))
        ));

        service
            .update_card(&UpdateBoltCardInput {
                id: card.id.clone(),
                tx_limit: Some(250_000),
                ..Default::default()
            })
            .await
            .unwrap();
        handler.callback(&k1, COFFEE_INVOICE).await.unwrap();

        let usage = service.find_card_usage_by_id(&k1).await.unwrap().unwrap();
        assert!(usage.spent);
        assert_eq!(usage.amount, 250_000);
        assert_eq!(gateway.payments(), 1);
    }

    #[tokio::test]
    async fn callback_rejections() {
        let (service, gateway, handler, card) = setup(settings()).await;

        assert!(matches!(
            handler.callback("bolt-card-usage:missing", "lntest1000").await,
            Err(WithdrawError::RecordNotFound)
        ));

        let k1 = tap(&handler, &card, 1).await.unwrap().k1;
        let err = handler.callback(&k1, "lnbc-garbage").await.unwrap_err();
        assert!(matches!(err, WithdrawError::InvalidPaymentRequest(_)));
        assert_eq!(err.public_message(), "Failed to decode payment request");

        service.enable_disable_card(&card.id, false).await.unwrap();
        assert!(matches!(
            handler.callback(&k1, "lntest1000").await,
            Err(WithdrawError::CardDisabled)
        ));
        assert_eq!(gateway.payments(), 0);
        assert!(!service.find_card_usage_by_id(&k1).await.unwrap().unwrap().spent);
    }

    #[test]
    fn card_errors_map_to_withdraw_errors() {
        assert!(matches!(
            WithdrawError::from(CardError::AlreadySpent),
            WithdrawError::AlreadyClaimed
        ));
        assert!(matches!(
            WithdrawError::from(CardError::CounterNotAdvanced { current: 4 }),
            WithdrawError::ReplayDetected { current: 4 }
        ));
        let internal = WithdrawError::from(CardError::Repository(anyhow!("disk full")));
        assert_eq!(internal.public_message(), "Unexpected error");
    }
}
