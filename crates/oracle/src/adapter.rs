use std::sync::Arc;

use chrono::TimeDelta;
use rust_decimal::Decimal;

use collateral_common::error::CollateralError;
use collateral_common::types::PriceReading;

use crate::clock::Clock;
use crate::{FeedAnswer, PriceFeed};

/// Validating wrapper around a [`PriceFeed`].
///
/// The adapter never retries. Unavailable, invalid and stale readings are
/// reported to the caller, which decides what they mean.
#[derive(Clone)]
pub struct OracleAdapter {
    feed: Arc<dyn PriceFeed>,
    clock: Arc<dyn Clock>,
}

impl OracleAdapter {
    pub fn new(feed: Arc<dyn PriceFeed>, clock: Arc<dyn Clock>) -> Self {
        Self { feed, clock }
    }

    pub fn feed_name(&self) -> &str {
        self.feed.name()
    }

    /// Latest normalized reading, without any freshness check.
    ///
    /// # Errors
    /// * `FeedUnavailable` - the feed could not be read
    /// * `InvalidPrice` - the answer is zero, negative or not representable
    pub fn read(&self) -> Result<PriceReading, CollateralError> {
        let raw = self.feed.latest_answer()?;
        normalize(raw).inspect_err(|e| {
            tracing::debug!(feed = self.feed.name(), error = %e, "Rejected feed answer");
        })
    }

    /// Latest reading, rejected as stale when older than `timeout`.
    pub fn read_checked(&self, timeout: TimeDelta) -> Result<PriceReading, CollateralError> {
        let reading = self.read()?;
        let age = self.clock.now() - reading.valid_at;

        if age > timeout {
            tracing::debug!(
                feed = self.feed.name(),
                age_secs = age.num_seconds(),
                timeout_secs = timeout.num_seconds(),
                "Rejected stale feed answer"
            );
            return Err(CollateralError::StalePrice {
                age_secs: age.num_seconds(),
                timeout_secs: timeout.num_seconds(),
            });
        }

        Ok(reading)
    }
}

impl std::fmt::Debug for OracleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleAdapter")
            .field("feed", &self.feed.name())
            .finish()
    }
}

/// Convert a raw feed answer into a positive fixed-point price.
pub fn normalize(raw: FeedAnswer) -> Result<PriceReading, CollateralError> {
    if raw.answer <= 0 {
        return Err(CollateralError::InvalidPrice(format!(
            "feed answered {}",
            raw.answer
        )));
    }

    let value = Decimal::try_from_i128_with_scale(raw.answer, raw.decimals).map_err(|e| {
        CollateralError::InvalidPrice(format!(
            "answer {} with {} decimals is not representable: {e}",
            raw.answer, raw.decimals
        ))
    })?;

    Ok(PriceReading {
        value: value.normalize(),
        valid_at: raw.updated_at,
    })
}
