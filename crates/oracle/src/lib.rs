//! Price oracle adapter.
//!
//! Wraps a raw upstream feed, normalizes its integer answer into a
//! [`Decimal`](rust_decimal::Decimal) and refuses to hand out zero, negative
//! or stale prices.

pub mod adapter;
pub mod clock;
pub mod shared;


use chrono::{DateTime, Utc};

use collateral_common::error::CollateralError;

pub use adapter::OracleAdapter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use shared::SharedPriceFeed;

/// Raw answer reported by a feed: an integer scaled by `10^decimals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedAnswer {
    pub answer: i128,
    pub decimals: u32,
    pub updated_at: DateTime<Utc>,
}

/// Trait that every upstream price feed implements.
pub trait PriceFeed: Send + Sync {
    /// Latest answer of the feed.
    ///
    /// Fails with [`CollateralError::FeedUnavailable`] when the feed cannot be
    /// reached or has never reported.
    fn latest_answer(&self) -> Result<FeedAnswer, CollateralError>;

    /// Human-readable name for this feed (e.g. "ETH/USD").
    fn name(&self) -> &str;
}
