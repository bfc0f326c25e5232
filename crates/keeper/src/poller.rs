use std::time::Duration;

use tokio::time::MissedTickBehavior;

use collateral_common::types::{CollateralStatus, CollateralStatusChanged};
use collateral_engine::Collateral;

use crate::notify::StatusNotifier;
use crate::sources::HttpSources;

/// Refresh loop that owns one collateral and drives it from HTTP snapshots.
pub struct RefreshLoop<N> {
    collateral: Collateral,
    sources: HttpSources,
    notifier: N,
    interval: Duration,
}

impl<N: StatusNotifier> RefreshLoop<N> {
    pub fn new(
        collateral: Collateral,
        sources: HttpSources,
        notifier: N,
        refresh_interval_ms: u64,
    ) -> Self {
        Self {
            collateral,
            sources,
            notifier,
            interval: Duration::from_millis(refresh_interval_ms),
        }
    }

    pub fn collateral(&self) -> &Collateral {
        &self.collateral
    }

    /// Sync the sources, refresh once and deliver any status change.
    pub async fn tick(&mut self) -> Option<CollateralStatusChanged> {
        self.sources.sync().await;
        let change = self.collateral.refresh();

        if let Some(change) = &change {
            if let Err(e) = self
                .notifier
                .notify(change, self.collateral.when_default())
                .await
            {
                tracing::error!(
                    token = %change.token,
                    error = %e,
                    "Failed to deliver status change"
                );
            }
        }

        match self.collateral.price(true) {
            Ok((is_fallback, price)) => tracing::info!(
                token = %self.collateral.token(),
                status = %self.collateral.status(),
                price = %price,
                is_fallback,
                "Collateral priced"
            ),
            Err(e) => tracing::warn!(
                token = %self.collateral.token(),
                status = %self.collateral.status(),
                error = %e,
                "Collateral could not be priced"
            ),
        }

        change
    }

    /// Refresh on every interval until the collateral is disabled.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.interval.is_zero(), "refresh interval must be greater than zero");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            token = %self.collateral.token(),
            refresh_interval_ms = self.interval.as_millis() as u64,
            "Refresh loop started"
        );

        loop {
            ticker.tick().await;
            self.tick().await;

            if self.collateral.status() == CollateralStatus::Disabled {
                tracing::warn!(
                    token = %self.collateral.token(),
                    when_default = %self.collateral.when_default(),
                    "Collateral disabled, stopping refresh loop"
                );
                return Ok(());
            }
        }
    }
}
