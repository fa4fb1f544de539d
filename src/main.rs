use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::info;

use basestack_agent::chain::{ChainClient, TxSigner};
use basestack_agent::config::Config;
use basestack_agent::engine::{EngineParams, SubmissionEngine};
use basestack_agent::events::{EventSink, JsonlEventSink};
use basestack_agent::monitoring;
use basestack_agent::notifier::Notifier;
use basestack_agent::oracle::{HermesOracle, PriceOracle};
use basestack_agent::retry::CancelToken;
use basestack_agent::rpc::{EvmRpcClient, NodeSigner};
use basestack_agent::scheduler::Scheduler;
use basestack_agent::strategy::dip::DipBuy;
use basestack_agent::strategy::recurring::RecurringBuy;
use basestack_agent::strategy::yield_harvest::YieldHarvest;
use basestack_agent::time::day_key;
use basestack_agent::venue::{RouterVenue, Venue, VenueAddresses};

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env if present (no-op in prod/systemd envs)
    let _ = dotenvy::dotenv();

    monitoring::init_tracing();

    let cfg = Config::from_env()?;
    info!(?cfg, "boot");
    info!(day = %day_key(&cfg.tz)?, dry_run = cfg.dry_run, "agent starting");

    let tz: chrono_tz::Tz = cfg
        .tz
        .parse()
        .map_err(|_| anyhow!("invalid tz: {}", cfg.tz))?;

    let rpc = EvmRpcClient::new(cfg.rpc_url.clone());
    let wallet = cfg
        .wallet_address
        .clone()
        .unwrap_or_else(|| "0x0000000000000000000000000000000000000000".to_string());

    let chain: Arc<dyn ChainClient> = Arc::new(rpc.clone());
    let signer: Arc<dyn TxSigner> =
        Arc::new(NodeSigner::new(rpc.clone(), wallet.clone(), cfg.chain_id));
    let sink: Arc<dyn EventSink> = Arc::new(JsonlEventSink::new(
        &cfg.events_path,
        cfg.events_keep_last,
    ));
    let oracle: Arc<dyn PriceOracle> = Arc::new(HermesOracle::new(
        cfg.hermes_url.clone(),
        cfg.btc_price_feed_id.clone(),
    ));
    let venue: Arc<dyn Venue> = Arc::new(RouterVenue::new(
        rpc,
        wallet,
        VenueAddresses {
            btc_token: cfg.btc_token.clone(),
            usdc_token: cfg.usdc_token.clone(),
            reward_token: cfg.reward_token.clone(),
            router: cfg.router_address.clone(),
            gauge: cfg.gauge_address.clone(),
            lp_token: cfg.lp_token.clone(),
        },
    ));

    let cancel = CancelToken::new();
    let engine = Arc::new(SubmissionEngine::new(
        chain,
        signer,
        sink.clone(),
        cancel.clone(),
        EngineParams {
            max_retries: cfg.max_retries,
            gas_bump_percent: cfg.gas_bump_percent,
            receipt_timeout: Duration::from_secs(cfg.receipt_timeout_secs),
            receipt_extended_timeout: Duration::from_secs(cfg.receipt_extended_timeout_secs),
            dry_run: cfg.dry_run,
        },
    ));

    let now = Utc::now();
    let mut scheduler = Scheduler::new(
        Duration::from_secs(cfg.tick_seconds),
        cancel.clone(),
        sink.clone(),
    )
    .with_notifier(Notifier::new(cfg.slack_webhook_url.clone()));

    scheduler.register(Box::new(RecurringBuy::new(
        cfg.buy_amount,
        cfg.interval,
        cfg.slippage_tolerance_pct,
        tz,
        now,
        oracle.clone(),
        venue.clone(),
        engine.clone(),
        sink.clone(),
    )));
    scheduler.register(Box::new(DipBuy::new(
        cfg.dip_enabled,
        cfg.buy_amount,
        cfg.dip_threshold_pct,
        cfg.slippage_tolerance_pct,
        chrono::Duration::hours(cfg.dip_cooldown_hours),
        now,
        oracle.clone(),
        venue.clone(),
        engine.clone(),
        sink.clone(),
    )));
    scheduler.register(Box::new(YieldHarvest::new(
        cfg.yield_enabled,
        cfg.reinvest_yield,
        cfg.min_liquidity_usd,
        now,
        oracle,
        venue,
        engine,
        sink,
    )));

    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            stop.cancel();
        }
    });

    scheduler.run().await;
    Ok(())
}
