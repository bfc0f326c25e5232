//! Collateral valuation and default state machine.
//!
//! A [`Collateral`] values one wrapped, yield-bearing token against its target
//! unit and decides whether it is still safe to count as backing:
//!
//! ```text
//!            soft evidence                 deadline reached
//!   SOUND ───────────────────▶ IFFY ─────────────────────────▶ DISABLED
//!     │                                                           ▲
//!     └──────────────── hard evidence (rate below floor) ─────────┘
//! ```
//!
//! Only [`Collateral::refresh`] mutates state. Every other query reads the
//! current feeds and bookkeeping without side effects. Exclusive access for
//! `refresh` is enforced by `&mut self`, so concurrent refreshes of one
//! instance cannot be expressed.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use collateral_common::config::CollateralConfig;
use collateral_common::error::CollateralError;
use collateral_common::types::{
    CollateralStatus, CollateralStatusChanged, RecoveryPolicy, WhenDefault,
};
use collateral_oracle::{Clock, OracleAdapter};

use crate::rate::ReferenceRate;

/// Mutable bookkeeping of a collateral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollateralState {
    pub status: CollateralStatus,
    /// `Never` while SOUND
    pub when_default: WhenDefault,
    /// Highest exchange rate observed while SOUND
    #[serde(with = "rust_decimal::serde::str")]
    pub peak_ref_per_tok: Decimal,
    /// When the collateral last entered IFFY
    pub iffy_since: Option<DateTime<Utc>>,
}

/// What a single refresh observed.
enum Evidence {
    /// The exchange rate fell below the revenue hiding floor.
    Hard { actual: Decimal, floor: Decimal },
    /// No trustworthy price (or rate) could be obtained.
    Soft(CollateralError),
    Healthy { actual: Decimal },
}

pub struct Collateral {
    config: CollateralConfig,
    /// Feed pricing the target unit (e.g. ETH/USD)
    target_oracle: OracleAdapter,
    /// Optional feed pricing the reference unit directly (e.g. stETH/USD)
    reference_oracle: Option<OracleAdapter>,
    rate: Box<dyn ReferenceRate>,
    clock: Arc<dyn Clock>,
    state: CollateralState,
}

impl Collateral {
    /// Build a SOUND collateral whose peak exchange rate is the rate observed
    /// now.
    ///
    /// # Errors
    /// * `Config` - invalid parameters, or a non-positive initial rate
    /// * `Read` - the exchange rate cannot be read
    pub fn new(
        config: CollateralConfig,
        target_oracle: OracleAdapter,
        rate: Box<dyn ReferenceRate>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CollateralError> {
        config.validate()?;

        let initial = rate.actual_ref_per_tok()?;
        if initial <= Decimal::ZERO {
            return Err(CollateralError::Config(format!(
                "initial exchange rate {initial} must be positive"
            )));
        }

        tracing::info!(
            token = %config.token,
            target = %config.target_name,
            feed = target_oracle.feed_name(),
            rate_source = rate.name(),
            peak_ref_per_tok = %initial,
            "Collateral created"
        );

        Ok(Self {
            config,
            target_oracle,
            reference_oracle: None,
            rate,
            clock,
            state: CollateralState {
                status: CollateralStatus::Sound,
                when_default: WhenDefault::Never,
                peak_ref_per_tok: initial,
                iffy_since: None,
            },
        })
    }

    /// Price the reference unit from its own feed and check it stays on peg.
    pub fn with_reference_oracle(mut self, oracle: OracleAdapter) -> Self {
        self.reference_oracle = Some(oracle);
        self
    }

    // ── configuration ────────────────────────────────────────────────

    pub fn config(&self) -> &CollateralConfig {
        &self.config
    }

    pub fn token(&self) -> &str {
        &self.config.token
    }

    pub fn target_name(&self) -> &str {
        &self.config.target_name
    }

    pub fn max_trade_volume(&self) -> Decimal {
        self.config.max_trade_volume
    }

    pub fn fallback_price(&self) -> Decimal {
        self.config.fallback_price
    }

    pub fn oracle_timeout(&self) -> TimeDelta {
        self.config.oracle_timeout()
    }

    pub fn delay_until_default(&self) -> TimeDelta {
        self.config.delay_until_default()
    }

    pub fn default_threshold(&self) -> Decimal {
        self.config.default_threshold
    }

    pub fn allowed_drop_bps(&self) -> u32 {
        self.config.allowed_drop_bps
    }

    pub fn is_collateral(&self) -> bool {
        true
    }

    // ── state ────────────────────────────────────────────────────────

    pub fn state(&self) -> &CollateralState {
        &self.state
    }

    pub fn status(&self) -> CollateralStatus {
        self.state.status
    }

    pub fn when_default(&self) -> WhenDefault {
        self.state.when_default
    }

    pub fn peak_ref_per_tok(&self) -> Decimal {
        self.state.peak_ref_per_tok
    }

    pub fn iffy_since(&self) -> Option<DateTime<Utc>> {
        self.state.iffy_since
    }

    // ── valuation ────────────────────────────────────────────────────

    /// Raw exchange rate from the asset's own accounting.
    pub fn actual_ref_per_tok(&self) -> Result<Decimal, CollateralError> {
        self.rate.actual_ref_per_tok()
    }

    /// Lowest rate tolerated before the collateral counts as impaired:
    /// `peak × (1 − allowedDrop)`.
    pub fn revenue_hiding_floor(&self) -> Decimal {
        let showing = Decimal::ONE - self.config.allowed_drop();
        (self.state.peak_ref_per_tok * showing).max(Decimal::ZERO)
    }

    /// Reported exchange rate: the revenue hiding floor, never above the
    /// actual rate.
    pub fn ref_per_tok(&self) -> Result<Decimal, CollateralError> {
        let actual = self.actual_ref_per_tok()?;
        Ok(self.revenue_hiding_floor().min(actual))
    }

    pub fn target_per_ref(&self) -> Decimal {
        self.config.target_per_ref
    }

    /// Price of one target unit, from a fresh target feed reading.
    pub fn price_per_target(&self) -> Result<Decimal, CollateralError> {
        self.checked_price(&self.target_oracle)
    }

    /// Price of one reference unit. Uses the reference feed when present,
    /// otherwise `pricePerTarget × targetPerRef`.
    pub fn price_per_ref(&self) -> Result<Decimal, CollateralError> {
        match &self.reference_oracle {
            Some(oracle) => self.checked_price(oracle),
            None => {
                let per_target = self.price_per_target()?;
                per_target
                    .checked_mul(self.config.target_per_ref)
                    .ok_or_else(|| {
                        CollateralError::PriceOutsideRange(format!(
                            "{per_target} × {} overflows",
                            self.config.target_per_ref
                        ))
                    })
            }
        }
    }

    /// Unit price of the token from fresh, valid readings only.
    ///
    /// # Errors
    /// * `PriceOutsideRange` - the feed answered zero/negative, or the product overflows
    /// * `StalePrice` - the reading is older than the oracle timeout
    /// * `FeedUnavailable` - the feed could not be read
    /// * `Read` - the exchange rate is unreadable
    pub fn strict_price(&self) -> Result<Decimal, CollateralError> {
        let price_per_ref = self.price_per_ref()?;
        let ref_per_tok = self.ref_per_tok()?;
        price_per_ref.checked_mul(ref_per_tok).ok_or_else(|| {
            CollateralError::PriceOutsideRange(format!("{price_per_ref} × {ref_per_tok} overflows"))
        })
    }

    /// Best-effort price as `(is_fallback, value)`.
    ///
    /// With `allow_fallback`, any price fault is replaced by the configured
    /// fallback price. An unreadable exchange rate is always an error.
    pub fn price(&self, allow_fallback: bool) -> Result<(bool, Decimal), CollateralError> {
        match self.strict_price() {
            Ok(price) => Ok((false, price)),
            Err(e) if allow_fallback && e.is_price_fault() => {
                tracing::debug!(
                    token = %self.config.token,
                    error = %e,
                    fallback = %self.config.fallback_price,
                    "Using fallback price"
                );
                Ok((true, self.config.fallback_price))
            }
            Err(e) => Err(e),
        }
    }

    // ── state machine ────────────────────────────────────────────────

    /// Evaluate the feeds and exchange rate once and advance the status.
    ///
    /// Never fails: every runtime error becomes default evidence. Returns the
    /// status change, if any.
    ///
    /// A hard default stamps `when_default = min(scheduled, now)`, so one
    /// reached from IFFY moves the deadline forward to now.
    pub fn refresh(&mut self) -> Option<CollateralStatusChanged> {
        let old = self.state.status;
        if old == CollateralStatus::Disabled {
            tracing::debug!(token = %self.config.token, "Refresh skipped, collateral disabled");
            return None;
        }

        let now = self.clock.now();

        match self.assess() {
            Evidence::Hard { actual, floor } => {
                tracing::warn!(
                    token = %self.config.token,
                    actual_ref_per_tok = %actual,
                    floor = %floor,
                    peak_ref_per_tok = %self.state.peak_ref_per_tok,
                    "Hard default: exchange rate below revenue hiding floor"
                );
                self.state.when_default = self.state.when_default.min(WhenDefault::At(now));
                self.state.status = CollateralStatus::Disabled;
            }
            Evidence::Soft(reason) => {
                tracing::warn!(
                    token = %self.config.token,
                    status = %old,
                    error = %reason,
                    "Soft default evidence"
                );
                match old {
                    CollateralStatus::Sound => self.mark_iffy(now),
                    _ => self.enforce_deadline(now),
                }
            }
            Evidence::Healthy { actual } => match (old, self.config.recovery) {
                (CollateralStatus::Sound, _) => self.raise_peak(actual),
                (_, RecoveryPolicy::Sticky) => self.enforce_deadline(now),
                (_, RecoveryPolicy::RecoverBeforeDeadline) => {
                    if self.state.when_default.has_passed(now) {
                        self.enforce_deadline(now);
                    } else {
                        self.recover(actual);
                    }
                }
            },
        }

        let new = self.state.status;
        tracing::debug!(
            token = %self.config.token,
            status = %new,
            when_default = %self.state.when_default,
            peak_ref_per_tok = %self.state.peak_ref_per_tok,
            "Collateral refreshed"
        );

        if old == new {
            return None;
        }

        tracing::info!(
            token = %self.config.token,
            old = %old,
            new = %new,
            when_default = %self.state.when_default,
            "Collateral status changed"
        );

        Some(CollateralStatusChanged {
            token: self.config.token.clone(),
            old,
            new,
            at: now,
        })
    }

    /// Gather evidence in priority order: hard default first, then price
    /// faults, then peg deviation.
    fn assess(&self) -> Evidence {
        let actual = match self.actual_ref_per_tok() {
            Ok(actual) => actual,
            Err(e) => return Evidence::Soft(e),
        };

        let floor = self.revenue_hiding_floor();
        if actual < floor {
            return Evidence::Hard { actual, floor };
        }

        if let Err(e) = self.price(false) {
            return Evidence::Soft(e);
        }
        if let Err(e) = self.check_peg() {
            return Evidence::Soft(e);
        }

        Evidence::Healthy { actual }
    }

    /// Reference price in target units must stay within
    /// `targetPerRef × (1 ± defaultThreshold)`. Without a reference feed the
    /// reference is priced from the target feed and cannot deviate.
    fn check_peg(&self) -> Result<(), CollateralError> {
        let Some(reference) = &self.reference_oracle else {
            return Ok(());
        };

        let per_ref = self.checked_price(reference)?;
        let per_target = self.price_per_target()?;
        let ratio = per_ref.checked_div(per_target).ok_or_else(|| {
            CollateralError::PriceOutsideRange(format!("{per_ref} / {per_target} overflows"))
        })?;

        let target_per_ref = self.config.target_per_ref;
        let band_overflow = || {
            CollateralError::PriceOutsideRange(format!(
                "peg band {target_per_ref} ± {} overflows",
                self.config.default_threshold
            ))
        };
        let spread = target_per_ref
            .checked_mul(self.config.default_threshold)
            .ok_or_else(band_overflow)?;
        let low = target_per_ref.checked_sub(spread).ok_or_else(band_overflow)?;
        let high = target_per_ref.checked_add(spread).ok_or_else(band_overflow)?;

        if ratio < low || ratio > high {
            return Err(CollateralError::OffPeg {
                price_per_ref_in_target: ratio,
                low,
                high,
            });
        }
        Ok(())
    }

    fn checked_price(&self, oracle: &OracleAdapter) -> Result<Decimal, CollateralError> {
        match oracle.read_checked(self.config.oracle_timeout()) {
            Ok(reading) => Ok(reading.value),
            Err(CollateralError::InvalidPrice(msg)) => Err(CollateralError::PriceOutsideRange(msg)),
            Err(e) => Err(e),
        }
    }

    fn mark_iffy(&mut self, now: DateTime<Utc>) {
        self.state.status = CollateralStatus::Iffy;
        self.state.iffy_since = Some(now);
        if self.state.when_default.is_never() {
            self.state.when_default = now
                .checked_add_signed(self.config.delay_until_default())
                .map_or(WhenDefault::Never, WhenDefault::At);
        }
    }

    fn enforce_deadline(&mut self, now: DateTime<Utc>) {
        if self.state.when_default.has_passed(now) {
            self.state.status = CollateralStatus::Disabled;
        }
    }

    fn recover(&mut self, actual: Decimal) {
        self.state.status = CollateralStatus::Sound;
        self.state.when_default = WhenDefault::Never;
        self.state.iffy_since = None;
        self.raise_peak(actual);
    }

    fn raise_peak(&mut self, actual: Decimal) {
        if actual > self.state.peak_ref_per_tok {
            self.state.peak_ref_per_tok = actual;
        }
    }
}

impl std::fmt::Debug for Collateral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collateral")
            .field("token", &self.config.token)
            .field("target_oracle", &self.target_oracle)
            .field("reference_oracle", &self.reference_oracle)
            .field("rate", &self.rate.name())
            .field("state", &self.state)
            .finish()
    }
}
