use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::Interval;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // RPC
    pub rpc_url: String,
    pub chain_id: u64,

    // Wallet (key custody stays on the signing node)
    pub wallet_address: Option<String>,

    // Price feed
    pub hermes_url: String,
    pub btc_price_feed_id: String,

    // Tokens / venue (Base mainnet defaults)
    pub btc_token: String,
    pub usdc_token: String,
    pub reward_token: String,
    pub router_address: String,
    pub gauge_address: String,
    pub lp_token: String,

    // DCA
    pub buy_amount: f64,
    pub interval: Interval,
    pub slippage_tolerance_pct: f64,

    // Dip buying
    pub dip_enabled: bool,
    pub dip_threshold_pct: f64,
    pub dip_cooldown_hours: i64,

    // Yield
    pub yield_enabled: bool,
    pub reinvest_yield: bool,
    pub min_liquidity_usd: f64,

    // Submission engine
    pub max_retries: u32,
    pub gas_bump_percent: u32,
    pub receipt_timeout_secs: u64,
    pub receipt_extended_timeout_secs: u64,

    // Runtime
    pub tick_seconds: u64,
    pub dry_run: bool,
    pub tz: String,

    // Persistence
    pub events_path: String,
    pub events_keep_last: usize,

    // Alerts
    pub slack_webhook_url: Option<String>,
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|s| s.trim().to_lowercase()) {
        None => default,
        Some(v) if v.is_empty() => default,
        Some(v) if v == "1" || v == "true" || v == "yes" || v == "y" || v == "on" => true,
        Some(v) if v == "0" || v == "false" || v == "no" || v == "n" || v == "off" => false,
        Some(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|x| x.parse().ok())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_interval() -> Interval {
    match std::env::var("DCA_INTERVAL")
        .ok()
        .map(|s| s.trim().to_lowercase())
        .as_deref()
    {
        None | Some("") | Some("weekly") => Interval::Weekly,
        Some("daily") => Interval::Daily,
        Some("monthly") => Interval::Monthly,
        Some(other) => {
            warn!(interval = other, "invalid DCA_INTERVAL, defaulting to daily");
            Interval::Daily
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rpc_url = env_or("BASE_RPC_URL", "https://mainnet.base.org");
        let chain_id = env_parse::<u64>("BASE_CHAIN_ID").unwrap_or(8453);
        let wallet_address = std::env::var("WALLET_ADDRESS").ok();

        let hermes_url = env_or("HERMES_URL", "https://hermes.pyth.network");
        let btc_price_feed_id = env_or(
            "PYTH_BTC_PRICE_FEED",
            "0xe62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43",
        );

        let btc_token = env_or(
            "CBBTC_CONTRACT_ADDRESS",
            "0xcbB7C0000aB88B473b1f5aFd9ef808440eed33Bf",
        );
        let usdc_token = env_or(
            "USDC_CONTRACT_ADDRESS",
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        );
        let reward_token = env_or(
            "AERO_CONTRACT_ADDRESS",
            "0x940181a94A35A4569E4529A3CDfB74e38FD98631",
        );
        let router_address = env_or(
            "AERODROME_ROUTER",
            "0xcF77a3Ba9A5CA399B7c97c74d54e5b1Beb874E43",
        );
        let gauge_address = env_or(
            "CBBTC_GAUGE",
            "0x6399ed6725cC163D019aA64FF55b22149D7179A8",
        );
        let lp_token = env_or("CBBTC_POOL", "0x4e962BB3889Bf030368F56810A9c96B83CB3E778");

        let buy_amount = env_parse::<f64>("DCA_AMOUNT").unwrap_or(50.0);
        let interval = parse_interval();
        let slippage_tolerance_pct = env_parse::<f64>("SLIPPAGE_TOLERANCE_PCT").unwrap_or(0.5);

        let dip_enabled = env_bool("ENABLE_DIP_BUYING", true);
        let dip_threshold_pct = env_parse::<f64>("DIP_THRESHOLD").unwrap_or(5.0);
        let dip_cooldown_hours = env_parse::<i64>("DIP_COOLDOWN_HOURS").unwrap_or(24);

        let yield_enabled = env_bool("ENABLE_YIELD_OPTIMIZATION", true);
        let reinvest_yield = env_bool("REINVEST_YIELD", true);
        let min_liquidity_usd = env_parse::<f64>("MIN_LIQUIDITY_USD").unwrap_or(1.0);

        let max_retries = env_parse::<u32>("MAX_RETRIES").unwrap_or(3);
        let gas_bump_percent = env_parse::<u32>("GAS_BUMP_PERCENT").unwrap_or(10);
        let receipt_timeout_secs = env_parse::<u64>("RECEIPT_TIMEOUT_SECS").unwrap_or(120);
        let receipt_extended_timeout_secs =
            env_parse::<u64>("RECEIPT_EXTENDED_TIMEOUT_SECS").unwrap_or(300);

        let tick_seconds = env_parse::<u64>("TICK_SECONDS").unwrap_or(60);
        let dry_run = env_bool("DRY_RUN", true);
        let tz = env_or("AGENT_TZ", "UTC");

        let events_path = env_or("EVENTS_PATH", "./events.jsonl");
        let events_keep_last = env_parse::<usize>("EVENTS_KEEP_LAST").unwrap_or(100);

        let slack_webhook_url = std::env::var("SLACK_WEBHOOK_URL").ok();

        if buy_amount <= 0.0 {
            return Err(anyhow!("DCA_AMOUNT must be positive"));
        }
        if !(0.0..100.0).contains(&slippage_tolerance_pct) || slippage_tolerance_pct == 0.0 {
            return Err(anyhow!("SLIPPAGE_TOLERANCE_PCT must be in (0, 100)"));
        }
        if dip_threshold_pct <= 0.0 {
            return Err(anyhow!("DIP_THRESHOLD must be positive"));
        }
        if !dry_run && wallet_address.is_none() {
            return Err(anyhow!("WALLET_ADDRESS is required unless DRY_RUN is set"));
        }

        Ok(Self {
            rpc_url,
            chain_id,
            wallet_address,
            hermes_url,
            btc_price_feed_id,
            btc_token,
            usdc_token,
            reward_token,
            router_address,
            gauge_address,
            lp_token,
            buy_amount,
            interval,
            slippage_tolerance_pct,
            dip_enabled,
            dip_threshold_pct,
            dip_cooldown_hours,
            yield_enabled,
            reinvest_yield,
            min_liquidity_usd,
            max_retries,
            gas_bump_percent,
            receipt_timeout_secs,
            receipt_extended_timeout_secs,
            tick_seconds,
            dry_run,
            tz,
            events_path,
            events_keep_last,
            slack_webhook_url,
        })
    }
}
