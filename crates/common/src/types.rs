use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Health status of a collateral.
///
/// Variants are ordered by severity, so `Sound < Iffy < Disabled`. A collateral
/// only ever moves towards `Disabled`, unless it was configured with
/// [`RecoveryPolicy::RecoverBeforeDeadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollateralStatus {
    Sound,
    Iffy,
    Disabled,
}

impl std::fmt::Display for CollateralStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollateralStatus::Sound => write!(f, "sound"),
            CollateralStatus::Iffy => write!(f, "iffy"),
            CollateralStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// When a collateral defaults (or defaulted).
///
/// `Never` sorts after every concrete timestamp, mirroring a max-value sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "at")]
pub enum WhenDefault {
    At(DateTime<Utc>),
    Never,
}

impl WhenDefault {
    pub fn is_never(&self) -> bool {
        matches!(self, WhenDefault::Never)
    }

    /// The concrete timestamp, if one is scheduled.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            WhenDefault::At(at) => Some(*at),
            WhenDefault::Never => None,
        }
    }

    /// Whether the deadline has been reached at `now`.
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        match self {
            WhenDefault::At(at) => now >= *at,
            WhenDefault::Never => false,
        }
    }
}

impl std::fmt::Display for WhenDefault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhenDefault::At(at) => write!(f, "{}", at.to_rfc3339()),
            WhenDefault::Never => write!(f, "never"),
        }
    }
}

/// A normalized price produced by the oracle adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReading {
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,
    pub valid_at: DateTime<Utc>,
}

/// What a refresh does with an IFFY collateral once fault evidence clears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Stay IFFY; the scheduled default stands.
    #[default]
    Sticky,
    /// Return to SOUND if evidence clears before the scheduled default.
    RecoverBeforeDeadline,
}

impl std::str::FromStr for RecoveryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sticky" => Ok(RecoveryPolicy::Sticky),
            "recover_before_deadline" => Ok(RecoveryPolicy::RecoverBeforeDeadline),
            other => Err(format!("unknown recovery policy: {other}")),
        }
    }
}

/// Notification emitted by a refresh that changed the collateral status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralStatusChanged {
    /// Identifier of the wrapped token
    pub token: String,
    pub old: CollateralStatus,
    pub new: CollateralStatus,
    /// Time of the refresh that caused the change
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_ordering_follows_severity() {
        assert!(CollateralStatus::Sound < CollateralStatus::Iffy);
        assert!(CollateralStatus::Iffy < CollateralStatus::Disabled);
    }

    #[test]
    fn test_never_sorts_after_any_timestamp() {
        let far = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert!(WhenDefault::At(far) < WhenDefault::Never);
        assert_eq!(
            WhenDefault::Never.min(WhenDefault::At(far)),
            WhenDefault::At(far)
        );
    }

    #[test]
    fn test_has_passed() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let when = WhenDefault::At(t);
        assert!(!when.has_passed(t - chrono::Duration::seconds(1)));
        assert!(when.has_passed(t));
        assert!(!WhenDefault::Never.has_passed(t));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(CollateralStatus::Disabled).unwrap();
        assert_eq!(json, serde_json::json!("disabled"));
    }

    #[test]
    fn test_recovery_policy_parse() {
        assert_eq!("sticky".parse(), Ok(RecoveryPolicy::Sticky));
        assert_eq!(
            "recover_before_deadline".parse(),
            Ok(RecoveryPolicy::RecoverBeforeDeadline)
        );
        assert!("lenient".parse::<RecoveryPolicy>().is_err());
    }
}
