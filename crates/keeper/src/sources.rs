//! HTTP snapshots of the price feeds and the exchange rate.
//!
//! Each sync fetches every endpoint once and pushes the result into the
//! shared handles the collateral reads from. A failed fetch clears the
//! corresponding snapshot, so the collateral sees an unavailable feed or an
//! unreadable rate instead of an old value. There are no retries; the next
//! sync tries again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use collateral_common::config::{KeeperConfig, RateKind};
use collateral_engine::{ReferenceRate, ShareAccountingRate, SharedRate};
use collateral_oracle::{PriceFeed, SharedPriceFeed};

/// Feed endpoint body: `{"answer": 185917000000, "decimals": 8, "updated_at": "..."}`
#[derive(Debug, Deserialize)]
struct FeedPayload {
    answer: i128,
    decimals: u32,
    updated_at: DateTime<Utc>,
}

/// Direct rate endpoint body: `{"rate": "1.02"}`
#[derive(Debug, Deserialize)]
struct RatePayload {
    #[serde(with = "rust_decimal::serde::str")]
    rate: Decimal,
}

/// Vault accounting endpoint body: `{"total_assets": "1020", "total_supply": "1000"}`
#[derive(Debug, Deserialize)]
struct SharesPayload {
    #[serde(with = "rust_decimal::serde::str")]
    total_assets: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    total_supply: Decimal,
}

/// Where fetched exchange-rate data lands.
#[derive(Debug, Clone)]
pub enum RateSink {
    Direct(SharedRate),
    Shares(ShareAccountingRate),
}

impl RateSink {
    fn new(kind: RateKind) -> Self {
        match kind {
            RateKind::Direct => Self::Direct(SharedRate::new()),
            RateKind::Shares => Self::Shares(ShareAccountingRate::new()),
        }
    }

    fn mark_unreadable(&self) {
        match self {
            Self::Direct(rate) => rate.mark_unreadable(),
            Self::Shares(rate) => rate.mark_unreadable(),
        }
    }

    /// A reader handle sharing this sink's snapshot.
    pub fn reader(&self) -> Box<dyn ReferenceRate> {
        match self {
            Self::Direct(rate) => Box::new(rate.clone()),
            Self::Shares(rate) => Box::new(rate.clone()),
        }
    }
}

/// Outcome of one sync, counted per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub failed: usize,
}

pub struct HttpSources {
    client: reqwest::Client,
    price_feed_url: String,
    reference_feed_url: Option<String>,
    rate_url: String,
    price_feed: SharedPriceFeed,
    reference_feed: Option<SharedPriceFeed>,
    rate: RateSink,
}

impl HttpSources {
    pub fn new(config: &KeeperConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("collateral-keeper")
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            price_feed_url: config.price_feed_url.clone(),
            reference_feed_url: config.reference_feed_url.clone(),
            rate_url: config.rate_url.clone(),
            price_feed: SharedPriceFeed::new("target"),
            reference_feed: config
                .reference_feed_url
                .as_ref()
                .map(|_| SharedPriceFeed::new("reference")),
            rate: RateSink::new(config.rate_kind),
        })
    }

    pub fn price_feed(&self) -> SharedPriceFeed {
        self.price_feed.clone()
    }

    pub fn reference_feed(&self) -> Option<SharedPriceFeed> {
        self.reference_feed.clone()
    }

    pub fn rate(&self) -> Box<dyn ReferenceRate> {
        self.rate.reader()
    }

    /// Fetch every endpoint once and publish the results.
    pub async fn sync(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let target = self.fetch_feed(&self.price_feed_url).await;
        Self::publish_feed(&self.price_feed, target, &mut report);

        if let (Some(url), Some(feed)) = (&self.reference_feed_url, &self.reference_feed) {
            let reference = self.fetch_feed(url).await;
            Self::publish_feed(feed, reference, &mut report);
        }

        match self.fetch_rate().await {
            Ok(()) => report.fetched += 1,
            Err(e) => {
                tracing::warn!(url = %self.rate_url, error = %e, "Exchange rate fetch failed");
                self.rate.mark_unreadable();
                report.failed += 1;
            }
        }

        tracing::debug!(
            fetched = report.fetched,
            failed = report.failed,
            "Sources synced"
        );
        report
    }

    async fn fetch_feed(&self, url: &str) -> anyhow::Result<FeedPayload> {
        let payload = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<FeedPayload>()
            .await?;
        Ok(payload)
    }

    fn publish_feed(
        feed: &SharedPriceFeed,
        fetched: anyhow::Result<FeedPayload>,
        report: &mut SyncReport,
    ) {
        match fetched {
            Ok(payload) => {
                feed.set_answer(payload.answer, payload.decimals, payload.updated_at);
                report.fetched += 1;
            }
            Err(e) => {
                tracing::warn!(feed = feed.name(), error = %e, "Price feed fetch failed");
                feed.mark_unavailable();
                report.failed += 1;
            }
        }
    }

    async fn fetch_rate(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .get(&self.rate_url)
            .send()
            .await?
            .error_for_status()?;

        match &self.rate {
            RateSink::Direct(rate) => {
                let payload = response.json::<RatePayload>().await?;
                rate.set_rate(payload.rate);
            }
            RateSink::Shares(rate) => {
                let payload = response.json::<SharesPayload>().await?;
                rate.set_accounting(payload.total_assets, payload.total_supply);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSources")
            .field("price_feed_url", &self.price_feed_url)
            .field("reference_feed_url", &self.reference_feed_url)
            .field("rate_url", &self.rate_url)
            .finish()
    }
}
