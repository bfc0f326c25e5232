use chrono::TimeDelta;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CollateralError;
use crate::types::RecoveryPolicy;

/// Denominator for basis-point quantities.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Longest accepted delay between soft default and disabling (2 weeks).
pub const MAX_DELAY_UNTIL_DEFAULT_SECS: u64 = 1_209_600;

/// Construction parameters of a single collateral. Immutable once the
/// collateral is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralConfig {
    /// Identifier of the wrapped (yield-bearing) token
    pub token: String,

    /// Name of the target unit, e.g. "ETH" or "USD"
    pub target_name: String,

    /// Price returned by `price(true)` when no trustworthy price exists
    #[serde(with = "rust_decimal::serde::str")]
    pub fallback_price: Decimal,

    /// Maximum age of an accepted oracle reading (seconds)
    pub oracle_timeout_secs: u64,

    /// Fixed conversion from the reference unit to the target unit
    #[serde(with = "rust_decimal::serde::str")]
    pub target_per_ref: Decimal,

    /// Tolerated fractional deviation from peg (0.05 = 5%)
    #[serde(with = "rust_decimal::serde::str")]
    pub default_threshold: Decimal,

    /// Time an IFFY collateral has before it is disabled (seconds)
    pub delay_until_default_secs: u64,

    /// Revenue hiding margin below the peak exchange rate (basis points)
    pub allowed_drop_bps: u32,

    /// Largest trade the trading subsystem may size for this collateral (UoA)
    #[serde(with = "rust_decimal::serde::str")]
    pub max_trade_volume: Decimal,

    #[serde(default)]
    pub recovery: RecoveryPolicy,
}

impl CollateralConfig {
    pub fn oracle_timeout(&self) -> TimeDelta {
        saturating_secs(self.oracle_timeout_secs)
    }

    pub fn delay_until_default(&self) -> TimeDelta {
        saturating_secs(self.delay_until_default_secs)
    }

    /// Allowed drop as a fraction, e.g. 500 bps -> 0.05.
    pub fn allowed_drop(&self) -> Decimal {
        Decimal::from(self.allowed_drop_bps) / Decimal::from(BPS_DENOMINATOR)
    }

    /// Reject configurations that would produce a collateral unable to
    /// detect default.
    pub fn validate(&self) -> Result<(), CollateralError> {
        if self.token.trim().is_empty() {
            return Err(CollateralError::Config("missing token".to_string()));
        }
        if self.fallback_price <= Decimal::ZERO {
            return Err(CollateralError::Config(
                "fallback price zero".to_string(),
            ));
        }
        if self.default_threshold <= Decimal::ZERO {
            return Err(CollateralError::Config(
                "defaultThreshold zero".to_string(),
            ));
        }
        if self.allowed_drop_bps >= BPS_DENOMINATOR {
            return Err(CollateralError::Config(format!(
                "allowed drop {} bps must be below {}",
                self.allowed_drop_bps, BPS_DENOMINATOR
            )));
        }
        if self.target_per_ref <= Decimal::ZERO {
            return Err(CollateralError::Config(
                "targetPerRef zero".to_string(),
            ));
        }
        if self.oracle_timeout_secs == 0 {
            return Err(CollateralError::Config("oracleTimeout zero".to_string()));
        }
        if self.delay_until_default_secs == 0 {
            return Err(CollateralError::Config(
                "delayUntilDefault zero".to_string(),
            ));
        }
        if self.delay_until_default_secs > MAX_DELAY_UNTIL_DEFAULT_SECS {
            return Err(CollateralError::Config(
                "delayUntilDefault too long".to_string(),
            ));
        }
        if self.max_trade_volume <= Decimal::ZERO {
            return Err(CollateralError::Config(
                "invalid max trade volume".to_string(),
            ));
        }
        Ok(())
    }

    /// Load collateral parameters from `COLLATERAL_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            token: std::env::var("COLLATERAL_TOKEN")
                .map_err(|_| anyhow::anyhow!("COLLATERAL_TOKEN environment variable is required"))?,
            target_name: std::env::var("COLLATERAL_TARGET_NAME")
                .unwrap_or_else(|_| "USD".to_string()),
            fallback_price: std::env::var("COLLATERAL_FALLBACK_PRICE")
                .map_err(|_| {
                    anyhow::anyhow!("COLLATERAL_FALLBACK_PRICE environment variable is required")
                })?
                .parse()
                .map_err(|_| anyhow::anyhow!("COLLATERAL_FALLBACK_PRICE must be a decimal"))?,
            oracle_timeout_secs: std::env::var("COLLATERAL_ORACLE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("COLLATERAL_ORACLE_TIMEOUT_SECS must be a valid u64"))?,
            target_per_ref: std::env::var("COLLATERAL_TARGET_PER_REF")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("COLLATERAL_TARGET_PER_REF must be a decimal"))?,
            default_threshold: std::env::var("COLLATERAL_DEFAULT_THRESHOLD")
                .unwrap_or_else(|_| "0.05".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("COLLATERAL_DEFAULT_THRESHOLD must be a decimal"))?,
            delay_until_default_secs: std::env::var("COLLATERAL_DELAY_UNTIL_DEFAULT_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("COLLATERAL_DELAY_UNTIL_DEFAULT_SECS must be a valid u64")
                })?,
            allowed_drop_bps: std::env::var("COLLATERAL_ALLOWED_DROP_BPS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("COLLATERAL_ALLOWED_DROP_BPS must be a valid u32"))?,
            max_trade_volume: std::env::var("COLLATERAL_MAX_TRADE_VOLUME")
                .unwrap_or_else(|_| "1000000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("COLLATERAL_MAX_TRADE_VOLUME must be a decimal"))?,
            recovery: std::env::var("COLLATERAL_RECOVERY_POLICY")
                .unwrap_or_else(|_| "sticky".to_string())
                .parse()
                .map_err(|e: String| anyhow::anyhow!("COLLATERAL_RECOVERY_POLICY: {e}"))?,
        };

        config.validate()?;
        Ok(config)
    }
}

fn saturating_secs(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// How the keeper reads the underlying asset's exchange rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateKind {
    /// The endpoint reports the rate itself: `{"rate": "1.02"}`
    Direct,
    /// The endpoint reports vault accounting: `{"total_assets": .., "total_supply": ..}`
    Shares,
}

/// Keeper service configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Target-unit price feed endpoint (e.g. ETH/USD)
    pub price_feed_url: String,

    /// Optional reference price feed endpoint (e.g. stETH/USD) for peg checks
    pub reference_feed_url: Option<String>,

    /// Underlying asset accounting endpoint
    pub rate_url: String,

    pub rate_kind: RateKind,

    /// Interval between refreshes in milliseconds (default: 60000)
    pub refresh_interval_ms: u64,

    /// Per-request HTTP timeout in milliseconds (default: 5000)
    pub http_timeout_ms: u64,

    /// Optional webhook receiving status-change notifications
    pub status_webhook_url: Option<String>,
}

impl KeeperConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            price_feed_url: std::env::var("PRICE_FEED_URL")
                .map_err(|_| anyhow::anyhow!("PRICE_FEED_URL environment variable is required"))?,
            reference_feed_url: std::env::var("REFERENCE_FEED_URL").ok(),
            rate_url: std::env::var("RATE_URL")
                .map_err(|_| anyhow::anyhow!("RATE_URL environment variable is required"))?,
            rate_kind: match std::env::var("RATE_KIND")
                .unwrap_or_else(|_| "direct".to_string())
                .as_str()
            {
                "direct" => RateKind::Direct,
                "shares" => RateKind::Shares,
                other => anyhow::bail!("RATE_KIND must be 'direct' or 'shares', got '{other}'"),
            },
            refresh_interval_ms: std::env::var("REFRESH_INTERVAL_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("REFRESH_INTERVAL_MS must be a valid u64"))?,
            http_timeout_ms: std::env::var("HTTP_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_MS must be a valid u64"))?,
            status_webhook_url: std::env::var("STATUS_WEBHOOK_URL").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject intervals that would stall the refresh loop or time out every fetch.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.refresh_interval_ms == 0 {
            anyhow::bail!("REFRESH_INTERVAL_MS must be greater than zero");
        }
        if self.http_timeout_ms == 0 {
            anyhow::bail!("HTTP_TIMEOUT_MS must be greater than zero");
        }
        Ok(())
    }
}
