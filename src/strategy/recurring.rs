use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{Interval, Outcome, ScheduleState};
use crate::engine::{SubmissionEngine, SubmitError};
use crate::events::{emit, Event, EventSink};
use crate::oracle::PriceOracle;
use crate::strategy::Strategy;
use crate::time::next_after;
use crate::venue::{Venue, VenueAsset};

const SWAP_DEADLINE_MINUTES: i64 = 10;

/// Fixed-interval DCA buys: a fixed USD amount of BTC every day/week/month.
pub struct RecurringBuy {
    buy_amount: f64,
    interval: Interval,
    slippage_pct: f64,
    tz: Tz,
    schedule: ScheduleState,
    oracle: Arc<dyn PriceOracle>,
    venue: Arc<dyn Venue>,
    engine: Arc<SubmissionEngine>,
    sink: Arc<dyn EventSink>,
}

impl RecurringBuy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buy_amount: f64,
        interval: Interval,
        slippage_pct: f64,
        tz: Tz,
        now: DateTime<Utc>,
        oracle: Arc<dyn PriceOracle>,
        venue: Arc<dyn Venue>,
        engine: Arc<SubmissionEngine>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let first = next_after(now, interval, tz);
        info!(?interval, next_eligible = %first, "recurring buy scheduled");
        Self {
            buy_amount,
            interval,
            slippage_pct,
            tz,
            schedule: ScheduleState::new(first, true),
            oracle,
            venue,
            engine,
            sink,
        }
    }

    pub fn schedule(&self) -> &ScheduleState {
        &self.schedule
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        self.schedule.advance(now, next_after(now, self.interval, self.tz));
        info!(next_eligible = %self.schedule.next_eligible, "next recurring buy scheduled");
    }

    fn emit_execution(&self, data: serde_json::Value) {
        emit(self.sink.as_ref(), Event::new("dca_execution", data));
    }
}

#[async_trait]
impl Strategy for RecurringBuy {
    fn name(&self) -> &'static str {
        "recurring_buy"
    }

    async fn should_execute(&mut self, now: DateTime<Utc>) -> bool {
        self.schedule.is_due(now)
    }

    async fn execute(&mut self, now: DateTime<Utc>) -> Result<Outcome> {
        let Some(sample) = self.oracle.current_price().await? else {
            // Keep the current buy window open so the same cycle is retried
            // on the next tick.
            warn!("price unavailable, keeping buy window open");
            self.emit_execution(json!({"status": "skipped_no_price"}));
            return Ok(Outcome::Failed("price unavailable".to_string()));
        };

        let btc_amount = self.buy_amount / sample.price;
        info!(
            price = sample.price,
            usd = self.buy_amount,
            btc = btc_amount,
            "executing recurring buy"
        );

        let balances = self.venue.idle_balances().await?;
        if balances.usdc < self.buy_amount {
            warn!(
                have = balances.usdc,
                need = self.buy_amount,
                "insufficient USDC for recurring buy"
            );
            self.emit_execution(json!({
                "status": "skipped_insufficient_funds",
                "usdc_balance": balances.usdc,
                "required": self.buy_amount,
            }));
            return Ok(Outcome::Failed("insufficient USDC balance".to_string()));
        }

        if let Some(approval) = self
            .venue
            .approval_intent(VenueAsset::Usdc, self.buy_amount)
            .await?
        {
            info!("approving router spend before buy");
            if let Err(e) = self.engine.submit(approval).await {
                let message = e.to_string();
                warn!(error = %message, "token approval failed");
                self.emit_execution(json!({"status": "approval_failed", "error": message}));
                return Ok(Outcome::Failed(message));
            }
        }

        let min_out = btc_amount * (1.0 - self.slippage_pct / 100.0);
        let deadline = now + Duration::minutes(SWAP_DEADLINE_MINUTES);
        let intent = self.venue.swap_usdc_for_btc(self.buy_amount, min_out, deadline);

        match self.engine.submit(intent).await {
            Ok(submitted) => {
                self.advance(now);
                self.emit_execution(json!({
                    "status": "success",
                    "tx_hash": submitted.receipt.transaction_hash,
                    "usd_amount": self.buy_amount,
                    "btc_amount": btc_amount,
                    "price": sample.price,
                }));
                Ok(Outcome::Success)
            }
            Err(e @ (SubmitError::Fatal(_) | SubmitError::RetriesExhausted { .. })) => {
                // Terminal failure: the cycle is spent, advance the schedule.
                let message = e.to_string();
                self.advance(now);
                self.emit_execution(json!({"status": "failed", "error": message}));
                Ok(Outcome::Failed(message))
            }
            Err(e) => {
                // Ambiguous (unconfirmed/cancelled) or chain unavailable:
                // funds may not have moved, so the window stays open. The
                // journal distinguishes the three so the audit trail stays
                // honest about whether anything was broadcast.
                let status = match &e {
                    SubmitError::Cancelled => "cancelled",
                    SubmitError::ChainUnavailable(_) => "chain_unavailable",
                    _ => "unconfirmed",
                };
                let message = e.to_string();
                self.emit_execution(json!({"status": status, "error": message}));
                Ok(Outcome::Failed(message))
            }
        }
    }
}
