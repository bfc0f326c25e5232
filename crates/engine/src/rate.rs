//! Exchange-rate sources for the wrapped reference asset.
//!
//! Each collateral variant reads its "actual ref per tok" differently. The
//! state machine only sees the [`ReferenceRate`] capability, so adding a
//! variant never touches the default logic.

use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;

use collateral_common::error::CollateralError;

/// Capability that reports the raw exchange rate of one token into its
/// reference unit, read from the asset's own accounting.
pub trait ReferenceRate: Send + Sync {
    /// Fails with [`CollateralError::Read`] only when the accounting itself
    /// is unreadable.
    fn actual_ref_per_tok(&self) -> Result<Decimal, CollateralError>;

    /// Human-readable name for this rate source.
    fn name(&self) -> &'static str;
}

/// Non-appreciating collateral: one token is always one reference unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeggedRate;

impl ReferenceRate for PeggedRate {
    fn actual_ref_per_tok(&self) -> Result<Decimal, CollateralError> {
        Ok(Decimal::ONE)
    }

    fn name(&self) -> &'static str {
        "pegged"
    }
}

/// Rate reported directly by the token (e.g. a ratio getter), pushed in by
/// whoever polls the token.
#[derive(Debug, Clone, Default)]
pub struct SharedRate {
    latest: Arc<RwLock<Option<Decimal>>>,
}

impl SharedRate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(rate: Decimal) -> Self {
        let shared = Self::new();
        shared.set_rate(rate);
        shared
    }

    pub fn set_rate(&self, rate: Decimal) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(rate);
    }

    pub fn mark_unreadable(&self) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl ReferenceRate for SharedRate {
    fn actual_ref_per_tok(&self) -> Result<Decimal, CollateralError> {
        let latest = *self.latest.read().unwrap_or_else(|e| e.into_inner());
        match latest {
            Some(rate) if rate < Decimal::ZERO => Err(CollateralError::Read(format!(
                "negative exchange rate {rate}"
            ))),
            Some(rate) => Ok(rate),
            None => Err(CollateralError::Read(
                "exchange rate has not been observed".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "shared"
    }
}

/// Vault-style accounting: the rate is total assets over total shares.
/// An empty vault converts one to one.
#[derive(Debug, Clone, Default)]
pub struct ShareAccountingRate {
    accounting: Arc<RwLock<Option<(Decimal, Decimal)>>>,
}

impl ShareAccountingRate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accounting(&self, total_assets: Decimal, total_supply: Decimal) {
        *self.accounting.write().unwrap_or_else(|e| e.into_inner()) =
            Some((total_assets, total_supply));
    }

    pub fn mark_unreadable(&self) {
        *self.accounting.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl ReferenceRate for ShareAccountingRate {
    fn actual_ref_per_tok(&self) -> Result<Decimal, CollateralError> {
        let accounting = *self.accounting.read().unwrap_or_else(|e| e.into_inner());
        let (assets, supply) = accounting.ok_or_else(|| {
            CollateralError::Read("vault accounting has not been observed".to_string())
        })?;

        if assets < Decimal::ZERO || supply < Decimal::ZERO {
            return Err(CollateralError::Read(format!(
                "negative vault accounting: assets {assets}, supply {supply}"
            )));
        }
        if supply.is_zero() {
            return Ok(Decimal::ONE);
        }

        assets
            .checked_div(supply)
            .ok_or_else(|| CollateralError::Read(format!("{assets} / {supply} overflows")))
    }

    fn name(&self) -> &'static str {
        "share_accounting"
    }
}
