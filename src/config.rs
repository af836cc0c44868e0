use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use crate::cards::LimitDefaults;
use crate::withdraw::WithdrawSettings;

#[derive(Parser, Debug, Clone)]
#[command(name = "boltcard-server")]
#[command(about = "Bolt Card LNURL-withdraw and card management server")]
#[command(version)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Externally visible base URL (e.g., "https://cards.example.com")
    #[arg(long, env = "PUBLIC_URL")]
    pub public_url: Url,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://boltcard.db")]
    pub database_url: String,

    /// Default transaction limit in satoshis
    #[arg(long, env = "DEFAULT_TX_LIMIT", default_value = "100000")]
    pub default_tx_limit: u64,

    /// Default daily limit in satoshis
    #[arg(long, env = "DEFAULT_DAILY_LIMIT", default_value = "500000")]
    pub default_daily_limit: u64,

    /// Description offered to wallets in withdraw requests
    #[arg(long, env = "WITHDRAW_DESCRIPTION", default_value = "Bolt Card Payment")]
    pub withdraw_description: String,

    /// Allow a usage whose payment failed to be redeemed again
    #[arg(
        long,
        env = "ALLOW_RETRY_AFTER_ROLLBACK",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub allow_retry_after_rollback: bool,
}

impl Config {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn limit_defaults(&self) -> LimitDefaults {
        LimitDefaults {
            tx_limit: self.default_tx_limit,
            daily_limit: self.default_daily_limit,
        }
    }

    pub fn withdraw_settings(&self) -> WithdrawSettings {
        WithdrawSettings {
            public_url: self.public_url.as_str().trim_end_matches('/').to_string(),
            description: self.withdraw_description.clone(),
            allow_retry_after_rollback: self.allow_retry_after_rollback,
        }
    }

    /// `lnurlw://` base a card is programmed with at pairing time.
    pub fn lnurlw_base(&self, card_id: &str) -> Result<String> {
        let host = self
            .public_url
            .host_str()
            .context("PUBLIC_URL has no host")?;
        let authority = match self.public_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(format!("lnurlw://{authority}/api/lnurl/withdraw/{card_id}"))
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config::parse_from(["boltcard-server", "--public-url", "https://cards.example.com"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = test_config();
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
        assert_eq!(config.database_url, "sqlite://boltcard.db");
        assert_eq!(config.limit_defaults().tx_limit, 100_000);
        assert_eq!(config.limit_defaults().daily_limit, 500_000);
        assert!(config.allow_retry_after_rollback);
        assert_eq!(
            config.withdraw_settings().callback_url("abc"),
            "https://cards.example.com/api/lnurl/withdraw/callback/abc"
        );
    }

    #[test]
    fn lnurlw_base_uses_public_host() {
        let config = test_config();
        assert_eq!(
            config.lnurlw_base("bolt-card:1").unwrap(),
            "lnurlw://cards.example.com/api/lnurl/withdraw/bolt-card:1"
        );

        let config = Config::parse_from([
            "boltcard-server",
            "--public-url",
            "http://localhost:3000/",
            "--allow-retry-after-rollback",
            "false",
        ]);
        assert_eq!(
            config.lnurlw_base("x").unwrap(),
            "lnurlw://localhost:3000/api/lnurl/withdraw/x"
        );
        assert!(!config.allow_retry_after_rollback);
    }
}
