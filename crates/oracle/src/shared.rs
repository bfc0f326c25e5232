use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use collateral_common::error::CollateralError;

use crate::{FeedAnswer, PriceFeed};

/// A feed whose latest answer is pushed in by a collaborator.
///
/// Clones share the same snapshot, so a fetcher can hold one handle while the
/// oracle adapter reads through another. A feed that has never been written,
/// or has been marked unavailable, reports `FeedUnavailable`.
#[derive(Debug, Clone)]
pub struct SharedPriceFeed {
    name: String,
    latest: Arc<RwLock<Option<FeedAnswer>>>,
}

impl SharedPriceFeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Record a raw integer answer.
    pub fn set_answer(&self, answer: i128, decimals: u32, updated_at: DateTime<Utc>) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(FeedAnswer {
            answer,
            decimals,
            updated_at,
        });
    }

    /// Record a decimal price, encoded the way an integer feed would report it.
    pub fn set_price(&self, price: Decimal, updated_at: DateTime<Utc>) {
        self.set_answer(price.mantissa(), price.scale(), updated_at);
    }

    /// Forget the latest answer, e.g. after a failed fetch.
    pub fn mark_unavailable(&self) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl PriceFeed for SharedPriceFeed {
    fn latest_answer(&self) -> Result<FeedAnswer, CollateralError> {
        let latest = *self.latest.read().unwrap_or_else(|e| e.into_inner());
        latest.ok_or_else(|| CollateralError::FeedUnavailable(format!("{} has no data", self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
