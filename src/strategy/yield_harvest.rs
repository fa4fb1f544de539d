use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::Outcome;
use crate::engine::{SubmissionEngine, SubmitError};
use crate::events::{emit, Event, EventSink};
use crate::oracle::PriceOracle;
use crate::strategy::Strategy;
use crate::venue::{Venue, VenueAsset};

const SWAP_DEADLINE_MINUTES: i64 = 10;

/// Equal-value liquidity sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquiditySizing {
    pub btc_amount: f64,
    pub usdc_amount: f64,
    /// USD value of the limiting (smaller) side.
    pub limiting_usd: f64,
}

/// Use the full balance of whichever asset is worth less in USD and a
/// price-converted equal-value amount of the other. Equal value counts as
/// USDC being the limiting side.
pub fn size_liquidity(btc_balance: f64, usdc_balance: f64, btc_price: f64) -> LiquiditySizing {
    let btc_usd = btc_balance * btc_price;
    if btc_usd < usdc_balance {
        LiquiditySizing {
            btc_amount: btc_balance,
            usdc_amount: btc_usd,
            limiting_usd: btc_usd,
        }
    } else {
        LiquiditySizing {
            btc_amount: usdc_balance / btc_price,
            usdc_amount: usdc_balance,
            limiting_usd: usdc_balance,
        }
    }
}

/// Claim-and-restake yield strategy with two independent timers: a daily
/// "stake idle balances" check and a weekly rewards claim.
pub struct YieldHarvest {
    enabled: bool,
    reinvest: bool,
    min_liquidity_usd: f64,
    next_stake_check: DateTime<Utc>,
    next_claim: DateTime<Utc>,
    oracle: Arc<dyn PriceOracle>,
    venue: Arc<dyn Venue>,
    engine: Arc<SubmissionEngine>,
    sink: Arc<dyn EventSink>,
}

impl YieldHarvest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        reinvest: bool,
        min_liquidity_usd: f64,
        now: DateTime<Utc>,
        oracle: Arc<dyn PriceOracle>,
        venue: Arc<dyn Venue>,
        engine: Arc<SubmissionEngine>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            enabled,
            reinvest,
            min_liquidity_usd,
            next_stake_check: now,
            next_claim: now,
            oracle,
            venue,
            engine,
            sink,
        }
    }

    fn emit_yield(&self, data: serde_json::Value) {
        emit(self.sink.as_ref(), Event::new("yield_execution", data));
    }

    /// Submits any approval the venue still needs for `asset`. The inner
    /// `Err` carries the failure message; the caller aborts its leg.
    async fn submit_approval(
        &self,
        asset: VenueAsset,
        amount: f64,
    ) -> Result<std::result::Result<(), String>> {
        let Some(approval) = self.venue.approval_intent(asset, amount).await? else {
            return Ok(Ok(()));
        };
        match self.engine.submit(approval).await {
            Ok(_) => Ok(Ok(())),
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, ?asset, "token approval failed");
                self.emit_yield(json!({"status": "approval_failed", "error": message}));
                Ok(Err(message))
            }
        }
    }

    /// Weekly leg: claim accrued rewards, optionally reinvest them.
    async fn run_claim(&mut self, now: DateTime<Utc>) -> Result<Outcome> {
        let rewards = match self.venue.pending_rewards().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "rewards balance unavailable");
                return Ok(Outcome::Skipped);
            }
        };
        if rewards <= 0.0 {
            self.next_claim = now + Duration::days(7);
            return Ok(Outcome::Skipped);
        }

        info!(rewards, "claiming gauge rewards");
        match self.engine.submit(self.venue.claim_rewards()).await {
            Ok(submitted) => {
                self.next_claim = now + Duration::days(7);
                self.emit_yield(json!({
                    "status": "claimed",
                    "rewards": rewards,
                    "tx_hash": submitted.receipt.transaction_hash,
                }));
            }
            Err(e @ (SubmitError::Fatal(_) | SubmitError::RetriesExhausted { .. })) => {
                self.next_claim = now + Duration::days(7);
                self.emit_yield(json!({"status": "claim_failed", "error": e.to_string()}));
                return Ok(Outcome::Failed(e.to_string()));
            }
            Err(e) => {
                // Ambiguous: leave the claim timer due so the next tick
                // re-evaluates the (idempotent) claim.
                self.emit_yield(json!({"status": "claim_unconfirmed", "error": e.to_string()}));
                return Ok(Outcome::Failed(e.to_string()));
            }
        }

        if self.reinvest {
            info!(rewards, "reinvesting claimed rewards into BTC");
            if let Err(e) = self.submit_approval(VenueAsset::Reward, rewards).await? {
                return Ok(Outcome::Failed(e));
            }
            let deadline = now + Duration::minutes(SWAP_DEADLINE_MINUTES);
            let intent = self.venue.swap_rewards_for_btc(rewards, deadline);
            if let Err(e) = self.engine.submit(intent).await {
                warn!(error = %e, "reinvest swap failed");
                self.emit_yield(json!({"status": "reinvest_failed", "error": e.to_string()}));
                return Ok(Outcome::Failed(e.to_string()));
            }
            self.emit_yield(json!({"status": "reinvested", "rewards": rewards}));
        }

        Ok(Outcome::Success)
    }

    /// Daily leg: pair up idle balances, add liquidity, stake the LP tokens.
    async fn run_stake_check(&mut self, now: DateTime<Utc>) -> Result<Outcome> {
        let Some(sample) = self.oracle.current_price().await? else {
            // No price means no USD valuation; keep the check due.
            warn!("price unavailable, skipping stake check");
            return Ok(Outcome::Skipped);
        };
        self.next_stake_check = now + Duration::days(1);

        let balances = self.venue.idle_balances().await?;
        let sizing = size_liquidity(balances.btc, balances.usdc, sample.price);
        if sizing.limiting_usd < self.min_liquidity_usd {
            info!(
                limiting_usd = sizing.limiting_usd,
                "idle balances below dust threshold, nothing to stake"
            );
            return Ok(Outcome::Skipped);
        }

        info!(
            btc = sizing.btc_amount,
            usdc = sizing.usdc_amount,
            "providing liquidity from idle balances"
        );
        if let Err(e) = self
            .submit_approval(VenueAsset::Btc, sizing.btc_amount)
            .await?
        {
            return Ok(Outcome::Failed(e));
        }
        if let Err(e) = self
            .submit_approval(VenueAsset::Usdc, sizing.usdc_amount)
            .await?
        {
            return Ok(Outcome::Failed(e));
        }

        let deadline = now + Duration::minutes(SWAP_DEADLINE_MINUTES);
        let intent = self
            .venue
            .add_liquidity(sizing.btc_amount, sizing.usdc_amount, deadline);
        match self.engine.submit(intent).await {
            Ok(_) => {}
            Err(e) => {
                self.emit_yield(json!({"status": "add_liquidity_failed", "error": e.to_string()}));
                return Ok(Outcome::Failed(e.to_string()));
            }
        }

        let lp = self.venue.lp_balance().await?;
        if lp <= 0.0 {
            warn!("no LP tokens after adding liquidity");
            return Ok(Outcome::Failed("no LP tokens to stake".to_string()));
        }
        if let Err(e) = self.submit_approval(VenueAsset::Lp, lp).await? {
            return Ok(Outcome::Failed(e));
        }
        match self.engine.submit(self.venue.stake_lp(lp)).await {
            Ok(submitted) => {
                self.emit_yield(json!({
                    "status": "staked",
                    "lp_amount": lp,
                    "btc_amount": sizing.btc_amount,
                    "usdc_amount": sizing.usdc_amount,
                    "tx_hash": submitted.receipt.transaction_hash,
                }));
                Ok(Outcome::Success)
            }
            Err(e) => {
                self.emit_yield(json!({"status": "stake_failed", "error": e.to_string()}));
                Ok(Outcome::Failed(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl Strategy for YieldHarvest {
    fn name(&self) -> &'static str {
        "yield_harvest"
    }

    async fn should_execute(&mut self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if now >= self.next_stake_check {
            return true;
        }
        if now >= self.next_claim {
            return match self.venue.pending_rewards().await {
                Ok(r) => r > 0.0,
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "rewards balance unavailable");
                    false
                }
            };
        }
        false
    }

    async fn execute(&mut self, now: DateTime<Utc>) -> Result<Outcome> {
        let mut outcome = Outcome::Skipped;

        if now >= self.next_claim {
            outcome = self.run_claim(now).await?;
        }

        if now >= self.next_stake_check {
            let stake_outcome = self.run_stake_check(now).await?;
            // A failure in either leg makes the whole execution Failed.
            outcome = match (outcome, stake_outcome) {
                (Outcome::Failed(e), _) | (_, Outcome::Failed(e)) => Outcome::Failed(e),
                (Outcome::Success, _) | (_, Outcome::Success) => Outcome::Success,
                _ => Outcome::Skipped,
            };
        }

        Ok(outcome)
    }
}
