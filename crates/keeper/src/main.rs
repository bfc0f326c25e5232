use std::sync::Arc;
use std::time::Duration;

use collateral_common::config::{CollateralConfig, KeeperConfig};
use collateral_engine::Collateral;
use collateral_keeper::notify::Notifier;
use collateral_keeper::poller::RefreshLoop;
use collateral_keeper::sources::HttpSources;
use collateral_oracle::{Clock, OracleAdapter, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "collateral_keeper=info,collateral_engine=info,collateral_oracle=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Collateral keeper starting...");

    // Load configuration
    let collateral_config = CollateralConfig::from_env()?;
    let keeper_config = KeeperConfig::from_env()?;

    // The initial exchange rate seeds the peak, so sources must be synced first
    let sources = HttpSources::new(&keeper_config)?;
    let report = sources.sync().await;
    tracing::info!(
        fetched = report.fetched,
        failed = report.failed,
        "Initial source sync complete"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let target_oracle = OracleAdapter::new(Arc::new(sources.price_feed()), clock.clone());
    let mut collateral =
        Collateral::new(collateral_config, target_oracle, sources.rate(), clock.clone())?;
    if let Some(reference) = sources.reference_feed() {
        collateral = collateral.with_reference_oracle(OracleAdapter::new(Arc::new(reference), clock));
    }

    let notifier = Notifier::from_webhook_url(
        keeper_config.status_webhook_url.as_deref(),
        Duration::from_millis(keeper_config.http_timeout_ms),
    )?;

    let mut refresh_loop = RefreshLoop::new(
        collateral,
        sources,
        notifier,
        keeper_config.refresh_interval_ms,
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = refresh_loop.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Refresh loop exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!(
        status = %refresh_loop.collateral().status(),
        "Collateral keeper stopped."
    );
    Ok(())
}
