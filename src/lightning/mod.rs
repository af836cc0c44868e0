use anyhow::{Result, anyhow};
use async_trait::async_trait;
use lightning_invoice::Bolt11Invoice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Newtype wrapper around Bolt11Invoice for convenience methods
#[derive(Debug, Clone)]
pub struct Invoice(Bolt11Invoice);

impl FromStr for Invoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bolt11Invoice::from_str(s.trim())
            .map(Self)
            .map_err(|e| anyhow!("Invalid invoice: {}", e))
    }
}

impl Invoice {
    pub fn amount_msats(&self) -> Result<u64> {
        self.0
            .amount_milli_satoshis()
            .ok_or_else(|| anyhow!("Invoice must have an amount"))
    }

    pub fn payment_hash(&self) -> String {
        hex::encode(self.0.payment_hash().as_ref() as &[u8])
    }
}

/// The parts of a payment request the withdraw flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInvoice {
    pub amount_msats: u64,
    pub payment_hash: String,
}

impl DecodedInvoice {
    /// Whole sats, rounded up so limits are never under-enforced.
    pub fn amount_sats(&self) -> u64 {
        self.amount_msats.div_ceil(1000)
    }
}

impl TryFrom<&Invoice> for DecodedInvoice {
    type Error = anyhow::Error;

    fn try_from(invoice: &Invoice) -> Result<Self> {
        Ok(Self {
            amount_msats: invoice.amount_msats()?,
            payment_hash: invoice.payment_hash(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResult {
    pub success: bool,
    pub error: Option<String>,
}

/// Sends Lightning payments out of a custodial wallet.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Decode a BOLT11 payment request; amountless requests are rejected.
    async fn decode_invoice(&self, payment_request: &str) -> Result<DecodedInvoice> {
        let invoice = Invoice::from_str(payment_request)?;
        DecodedInvoice::try_from(&invoice)
    }

    /// Pay `payment_request` from `wallet_id` on behalf of `user_id`.
    async fn pay_invoice(
        &self,
        payment_request: &str,
        wallet_id: &str,
        user_id: &str,
    ) -> Result<PaymentResult>;
}

pub type PaymentGatewayPtr = Arc<dyn PaymentGateway>;

/// Internal identity of the wallet a card spends from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletOwner {
    pub wallet_id: String,
    pub user_id: String,
}

/// Resolves a card's public wallet id to the owning wallet and user.
#[async_trait]
pub trait WalletOwners: Send + Sync {
    async fn find_owner(&self, wallet_id: &str) -> Result<Option<WalletOwner>>;
}

pub type WalletOwnersPtr = Arc<dyn WalletOwners>;

/// Mock implementation for running without a ledger
pub struct MockGateway;

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn pay_invoice(
        &self,
        payment_request: &str,
        wallet_id: &str,
        _user_id: &str,
    ) -> Result<PaymentResult> {
        let invoice = Invoice::from_str(payment_request)?;
        let amount_msats = invoice.amount_msats()?;

        tracing::info!(
            wallet_id,
            amount_msats,
            payment_hash = %invoice.payment_hash(),
            "mock payment"
        );

        // Mock successful payment
        Ok(PaymentResult {
            success: true,
            error: None,
        })
    }
}

/// Owner lookup backed by a fixed map; unknown wallets resolve to
/// themselves with a user id equal to the wallet id.
#[derive(Default)]
pub struct StaticWalletOwners {
    owners: HashMap<String, WalletOwner>,
}

impl StaticWalletOwners {
    pub fn with_owner(mut self, public_id: &str, owner: WalletOwner) -> Self {
        self.owners.insert(public_id.to_string(), owner);
        self
    }
}

#[async_trait]
impl WalletOwners for StaticWalletOwners {
    async fn find_owner(&self, wallet_id: &str) -> Result<Option<WalletOwner>> {
        Ok(Some(self.owners.get(wallet_id).cloned().unwrap_or_else(|| WalletOwner {
            wallet_id: wallet_id.to_string(),
            user_id: wallet_id.to_string(),
        })))
    }
}
