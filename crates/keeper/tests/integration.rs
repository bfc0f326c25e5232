//! Integration tests for the keeper against an in-process HTTP upstream.
//!
//! An axum server bound to `127.0.0.1:0` serves the price feed, the exchange
//! rate and a webhook sink; tests mutate its state between refreshes.
//!
//! ```bash
//! cargo test -p collateral-keeper --test integration
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::{Value, json};

use collateral_common::config::{CollateralConfig, KeeperConfig, RateKind};
use collateral_common::error::CollateralError;
use collateral_common::types::{CollateralStatus, RecoveryPolicy};
use collateral_engine::{Collateral, ReferenceRate};
use collateral_keeper::notify::{LogNotifier, Notifier, WebhookNotifier};
use collateral_keeper::poller::RefreshLoop;
use collateral_keeper::sources::HttpSources;
use collateral_oracle::{Clock, ManualClock, OracleAdapter, PriceFeed};

// ============================================================
// In-process upstream
// ============================================================

#[derive(Clone, Default)]
struct Upstream {
    feed: Arc<Mutex<Option<Value>>>,
    reference: Arc<Mutex<Option<Value>>>,
    rate: Arc<Mutex<Option<Value>>>,
    hooks: Arc<Mutex<Vec<Value>>>,
}

impl Upstream {
    fn set(slot: &Arc<Mutex<Option<Value>>>, value: Option<Value>) {
        *slot.lock().unwrap() = value;
    }

    fn hooks(&self) -> Vec<Value> {
        self.hooks.lock().unwrap().clone()
    }
}

fn serve(slot: &Arc<Mutex<Option<Value>>>) -> Result<Json<Value>, StatusCode> {
    slot.lock()
        .unwrap()
        .clone()
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

async fn feed(State(up): State<Upstream>) -> Result<Json<Value>, StatusCode> {
    serve(&up.feed)
}

async fn reference(State(up): State<Upstream>) -> Result<Json<Value>, StatusCode> {
    serve(&up.reference)
}

async fn rate(State(up): State<Upstream>) -> Result<Json<Value>, StatusCode> {
    serve(&up.rate)
}

async fn webhook(State(up): State<Upstream>, Json(body): Json<Value>) -> StatusCode {
    up.hooks.lock().unwrap().push(body);
    StatusCode::OK
}

/// Start the upstream and return its base URL.
async fn spawn_upstream(up: Upstream) -> String {
    let app = Router::new()
        .route("/feed", get(feed))
        .route("/reference", get(reference))
        .route("/rate", get(rate))
        .route("/webhook", post(webhook))
        .with_state(up);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ============================================================
// Helpers
// ============================================================

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 10, 9, 0, 0).unwrap()
}

fn feed_body(answer: i64, at: DateTime<Utc>) -> Value {
    json!({ "answer": answer, "decimals": 8, "updated_at": at.to_rfc3339() })
}

fn keeper_config(base: &str, rate_kind: RateKind) -> KeeperConfig {
    KeeperConfig {
        price_feed_url: format!("{base}/feed"),
        reference_feed_url: None,
        rate_url: format!("{base}/rate"),
        rate_kind,
        refresh_interval_ms: 10,
        http_timeout_ms: 2_000,
        status_webhook_url: Some(format!("{base}/webhook")),
    }
}

fn collateral_config() -> CollateralConfig {
    CollateralConfig {
        token: "icETH".to_string(),
        target_name: "ETH".to_string(),
        fallback_price: dec!(1),
        oracle_timeout_secs: 3_600,
        target_per_ref: dec!(1),
        default_threshold: dec!(0.05),
        delay_until_default_secs: 86_400,
        allowed_drop_bps: 500,
        max_trade_volume: dec!(1000000),
        recovery: RecoveryPolicy::Sticky,
    }
}

fn build_collateral(sources: &HttpSources, clock: Arc<ManualClock>) -> Collateral {
    let mut collateral = Collateral::new(
        collateral_config(),
        OracleAdapter::new(Arc::new(sources.price_feed()), clock.clone()),
        sources.rate(),
        clock.clone(),
    )
    .unwrap();
    if let Some(reference) = sources.reference_feed() {
        collateral = collateral.with_reference_oracle(OracleAdapter::new(Arc::new(reference), clock));
    }
    collateral
}

// ============================================================
// Source sync
// ============================================================

#[tokio::test]
async fn test_sync_publishes_feed_and_rate() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(185_917_000_000, start())));
    Upstream::set(&up.rate, Some(json!({ "rate": "1.02" })));
    let base = spawn_upstream(up.clone()).await;

    let sources = HttpSources::new(&keeper_config(&base, RateKind::Direct)).unwrap();
    let report = sources.sync().await;
    assert_eq!(report.fetched, 2);
    assert_eq!(report.failed, 0);

    let answer = sources.price_feed().latest_answer().unwrap();
    assert_eq!(answer.answer, 185_917_000_000);
    assert_eq!(answer.decimals, 8);
    assert_eq!(answer.updated_at, start());
    assert_eq!(sources.rate().actual_ref_per_tok().unwrap(), dec!(1.02));
}

#[tokio::test]
async fn test_failed_fetch_clears_snapshot() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(185_917_000_000, start())));
    Upstream::set(&up.rate, Some(json!({ "rate": "1.0" })));
    let base = spawn_upstream(up.clone()).await;

    let sources = HttpSources::new(&keeper_config(&base, RateKind::Direct)).unwrap();
    sources.sync().await;
    assert!(sources.price_feed().latest_answer().is_ok());

    Upstream::set(&up.feed, None);
    Upstream::set(&up.rate, Some(json!({ "unexpected": true })));
    let report = sources.sync().await;
    assert_eq!(report.failed, 2);

    assert!(matches!(
        sources.price_feed().latest_answer(),
        Err(CollateralError::FeedUnavailable(_))
    ));
    assert!(matches!(
        sources.rate().actual_ref_per_tok(),
        Err(CollateralError::Read(_))
    ));
}

#[tokio::test]
async fn test_unreachable_upstream_marks_everything_unavailable() {
    let config = KeeperConfig {
        http_timeout_ms: 200,
        ..keeper_config("http://127.0.0.1:1", RateKind::Direct)
    };
    let sources = HttpSources::new(&config).unwrap();
    let report = sources.sync().await;
    assert_eq!(report.fetched, 0);
    assert_eq!(report.failed, 2);
}

#[tokio::test]
async fn test_share_accounting_rate() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(100_000_000, start())));
    Upstream::set(
        &up.rate,
        Some(json!({ "total_assets": "1050", "total_supply": "1000" })),
    );
    let base = spawn_upstream(up.clone()).await;

    let sources = HttpSources::new(&keeper_config(&base, RateKind::Shares)).unwrap();
    sources.sync().await;
    assert_eq!(sources.rate().actual_ref_per_tok().unwrap(), dec!(1.05));
}

// ============================================================
// Refresh loop
// ============================================================

#[tokio::test]
async fn test_tick_keeps_sound_collateral_quiet() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(185_917_000_000, start())));
    Upstream::set(&up.rate, Some(json!({ "rate": "1.0" })));
    let base = spawn_upstream(up.clone()).await;

    let config = keeper_config(&base, RateKind::Direct);
    let sources = HttpSources::new(&config).unwrap();
    sources.sync().await;
    let collateral = build_collateral(&sources, Arc::new(ManualClock::new(start())));

    let mut refresh_loop = RefreshLoop::new(collateral, sources, LogNotifier, 10);
    assert!(refresh_loop.tick().await.is_none());
    assert_eq!(refresh_loop.collateral().status(), CollateralStatus::Sound);
    assert_eq!(
        refresh_loop.collateral().strict_price().unwrap(),
        dec!(1766.2115)
    );
}

#[tokio::test]
async fn test_feed_outage_goes_iffy_and_posts_webhook() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(185_917_000_000, start())));
    Upstream::set(&up.rate, Some(json!({ "rate": "1.0" })));
    let base = spawn_upstream(up.clone()).await;

    let config = keeper_config(&base, RateKind::Direct);
    let sources = HttpSources::new(&config).unwrap();
    sources.sync().await;
    let collateral = build_collateral(&sources, Arc::new(ManualClock::new(start())));
    let notifier = Notifier::from_webhook_url(
        config.status_webhook_url.as_deref(),
        Duration::from_secs(2),
    )
    .unwrap();

    let mut refresh_loop = RefreshLoop::new(collateral, sources, notifier, 10);
    Upstream::set(&up.feed, None);
    let change = refresh_loop.tick().await.unwrap();
    assert_eq!(change.new, CollateralStatus::Iffy);
    assert_eq!(refresh_loop.collateral().price(true).unwrap(), (true, dec!(1)));

    let hooks = up.hooks();
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0]["event"], "collateral_status_changed");
    assert_eq!(hooks[0]["token"], "icETH");
    assert_eq!(hooks[0]["old"], "sound");
    assert_eq!(hooks[0]["new"], "iffy");
    assert_eq!(hooks[0]["when_default"]["kind"], "at");
}

#[tokio::test]
async fn test_off_peg_reference_feed_goes_iffy() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(200_000_000_000, start())));
    Upstream::set(&up.reference, Some(feed_body(198_000_000_000, start())));
    Upstream::set(&up.rate, Some(json!({ "rate": "1.0" })));
    let base = spawn_upstream(up.clone()).await;

    let config = KeeperConfig {
        reference_feed_url: Some(format!("{base}/reference")),
        ..keeper_config(&base, RateKind::Direct)
    };
    let sources = HttpSources::new(&config).unwrap();
    assert_eq!(sources.sync().await.fetched, 3);
    let collateral = build_collateral(&sources, Arc::new(ManualClock::new(start())));

    let mut refresh_loop = RefreshLoop::new(collateral, sources, LogNotifier, 10);
    assert!(refresh_loop.tick().await.is_none());

    Upstream::set(&up.reference, Some(feed_body(180_000_000_000, start())));
    let change = refresh_loop.tick().await.unwrap();
    assert_eq!(change.new, CollateralStatus::Iffy);
}

#[tokio::test]
async fn test_run_stops_once_disabled() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(185_917_000_000, start())));
    Upstream::set(&up.rate, Some(json!({ "rate": "1.0" })));
    let base = spawn_upstream(up.clone()).await;

    let config = keeper_config(&base, RateKind::Direct);
    let sources = HttpSources::new(&config).unwrap();
    sources.sync().await;
    let clock = Arc::new(ManualClock::new(start()));
    let collateral = build_collateral(&sources, clock.clone());
    let notifier = WebhookNotifier::new(format!("{base}/webhook"), Duration::from_secs(2)).unwrap();

    // A 50% drop in the exchange rate is a hard default
    Upstream::set(&up.rate, Some(json!({ "rate": "0.5" })));

    let mut refresh_loop = RefreshLoop::new(collateral, sources, notifier, 10);
    tokio::time::timeout(Duration::from_secs(5), refresh_loop.run())
        .await
        .expect("refresh loop should stop once disabled")
        .unwrap();

    assert_eq!(refresh_loop.collateral().status(), CollateralStatus::Disabled);
    assert_eq!(
        refresh_loop.collateral().when_default().timestamp(),
        Some(clock.now())
    );

    let hooks = up.hooks();
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0]["old"], "sound");
    assert_eq!(hooks[0]["new"], "disabled");
}

#[tokio::test]
async fn test_run_rejects_zero_interval() {
    let up = Upstream::default();
    Upstream::set(&up.feed, Some(feed_body(185_917_000_000, start())));
    Upstream::set(&up.rate, Some(json!({ "rate": "1.0" })));
    let base = spawn_upstream(up.clone()).await;

    let sources = HttpSources::new(&keeper_config(&base, RateKind::Direct)).unwrap();
    sources.sync().await;
    let collateral = build_collateral(&sources, Arc::new(ManualClock::new(start())));

    let mut refresh_loop = RefreshLoop::new(collateral, sources, LogNotifier, 0);
    let err = refresh_loop.run().await.unwrap_err();
    assert!(err.to_string().contains("refresh interval"));
    assert_eq!(refresh_loop.collateral().status(), CollateralStatus::Sound);
}
