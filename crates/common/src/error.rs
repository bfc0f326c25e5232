use rust_decimal::Decimal;
use thiserror::Error;

/// Error taxonomy shared by the oracle adapter and the collateral state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollateralError {
    #[error("Price feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Stale price: reading is {age_secs}s old, timeout is {timeout_secs}s")]
    StalePrice { age_secs: i64, timeout_secs: i64 },

    #[error("Price outside range: {0}")]
    PriceOutsideRange(String),

    #[error("Reference off peg: {price_per_ref_in_target} outside [{low}, {high}]")]
    OffPeg {
        price_per_ref_in_target: Decimal,
        low: Decimal,
        high: Decimal,
    },

    #[error("Exchange rate unreadable: {0}")]
    Read(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CollateralError {
    /// Whether this error describes the price source rather than the
    /// underlying asset or the configuration.
    pub fn is_price_fault(&self) -> bool {
        matches!(
            self,
            CollateralError::FeedUnavailable(_)
                | CollateralError::InvalidPrice(_)
                | CollateralError::StalePrice { .. }
                | CollateralError::PriceOutsideRange(_)
                | CollateralError::OffPeg { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CollateralError>;
