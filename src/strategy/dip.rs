use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{Outcome, PriceWindow};
use crate::engine::{SubmissionEngine, SubmitError};
use crate::events::{emit, Event, EventSink};
use crate::oracle::PriceOracle;
use crate::strategy::Strategy;
use crate::venue::{Venue, VenueAsset};

const WINDOW_CAPACITY: usize = 24;
/// Detection needs this many samples before the metric is meaningful.
const MIN_SAMPLES: usize = 6;
/// Trailing mean is taken over this many samples, excluding the current one.
const TRAILING_SAMPLES: usize = 6;
const SWAP_DEADLINE_MINUTES: i64 = 10;

/// Threshold-triggered dip buys over a trailing price window.
///
/// Two-tier policy: every dip detection is journaled, but a buy happens at
/// most once per cooldown window. Detections inside the cooldown are recorded
/// as `detected_only`.
pub struct DipBuy {
    enabled: bool,
    buy_amount: f64,
    threshold_pct: f64,
    slippage_pct: f64,
    window: PriceWindow,
    check_interval: Duration,
    next_check: DateTime<Utc>,
    last_dip_buy: Option<DateTime<Utc>>,
    cooldown: Duration,
    oracle: Arc<dyn PriceOracle>,
    venue: Arc<dyn Venue>,
    engine: Arc<SubmissionEngine>,
    sink: Arc<dyn EventSink>,
}

impl DipBuy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        enabled: bool,
        buy_amount: f64,
        threshold_pct: f64,
        slippage_pct: f64,
        cooldown: Duration,
        now: DateTime<Utc>,
        oracle: Arc<dyn PriceOracle>,
        venue: Arc<dyn Venue>,
        engine: Arc<SubmissionEngine>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            enabled,
            buy_amount,
            threshold_pct,
            slippage_pct,
            window: PriceWindow::new(WINDOW_CAPACITY),
            check_interval: Duration::hours(1),
            next_check: now,
            last_dip_buy: None,
            cooldown,
            oracle,
            venue,
            engine,
            sink,
        }
    }

    pub fn last_dip_buy(&self) -> Option<DateTime<Utc>> {
        self.last_dip_buy
    }

    /// Percent drop of the current price below the trailing mean, when it
    /// meets the threshold.
    fn detect_dip(&self) -> Option<f64> {
        if self.window.len() < MIN_SAMPLES {
            return None;
        }
        let current = self.window.latest()?.price;
        let mean = self.window.trailing_mean_excluding_latest(TRAILING_SAMPLES)?;
        let percent_drop = (mean - current) / mean * 100.0;
        if percent_drop >= self.threshold_pct {
            Some(percent_drop)
        } else {
            None
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_dip_buy
            .map(|t| now < t + self.cooldown)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Strategy for DipBuy {
    fn name(&self) -> &'static str {
        "dip_buy"
    }

    async fn should_execute(&mut self, now: DateTime<Utc>) -> bool {
        if !self.enabled || now < self.next_check {
            return false;
        }
        self.next_check = now + self.check_interval;

        // Window refresh is the one permitted side effect here; it is
        // idempotent per check window and required to evaluate the metric.
        match self.oracle.current_price().await {
            Ok(Some(sample)) => self.window.push(sample),
            Ok(None) => {
                warn!("price unavailable, skipping dip check");
                return false;
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "price fetch failed, skipping dip check");
                return false;
            }
        }

        let Some(percent_drop) = self.detect_dip() else {
            return false;
        };
        let price = self.window.latest().map(|s| s.price);

        if self.in_cooldown(now) {
            info!(percent_drop, "dip detected during cooldown, not acting");
            emit(
                self.sink.as_ref(),
                Event::new(
                    "dip_detected",
                    json!({
                        "status": "detected_only",
                        "percent_drop": percent_drop,
                        "price": price,
                    }),
                ),
            );
            return false;
        }

        info!(percent_drop, "dip detected, triggering buy");
        emit(
            self.sink.as_ref(),
            Event::new(
                "dip_detected",
                json!({
                    "status": "triggered",
                    "percent_drop": percent_drop,
                    "price": price,
                }),
            ),
        );
        true
    }

    async fn execute(&mut self, now: DateTime<Utc>) -> Result<Outcome> {
        let Some(sample) = self.oracle.current_price().await? else {
            warn!("price unavailable, aborting dip buy");
            return Ok(Outcome::Failed("price unavailable".to_string()));
        };

        let btc_amount = self.buy_amount / sample.price;
        info!(
            price = sample.price,
            usd = self.buy_amount,
            btc = btc_amount,
            "executing dip buy"
        );

        let balances = self.venue.idle_balances().await?;
        if balances.usdc < self.buy_amount {
            warn!(
                have = balances.usdc,
                need = self.buy_amount,
                "insufficient USDC for dip buy"
            );
            return Ok(Outcome::Failed("insufficient USDC balance".to_string()));
        }

        if let Some(approval) = self
            .venue
            .approval_intent(VenueAsset::Usdc, self.buy_amount)
            .await?
        {
            if let Err(e) = self.engine.submit(approval).await {
                let message = e.to_string();
                warn!(error = %message, "token approval failed");
                emit(
                    self.sink.as_ref(),
                    Event::new(
                        "dip_execution",
                        json!({"status": "approval_failed", "error": message}),
                    ),
                );
                return Ok(Outcome::Failed(message));
            }
        }

        let min_out = btc_amount * (1.0 - self.slippage_pct / 100.0);
        let deadline = now + Duration::minutes(SWAP_DEADLINE_MINUTES);
        let intent = self.venue.swap_usdc_for_btc(self.buy_amount, min_out, deadline);

        match self.engine.submit(intent).await {
            Ok(submitted) => {
                // Cooldown starts only once a buy actually lands.
                self.last_dip_buy = Some(now);
                emit(
                    self.sink.as_ref(),
                    Event::new(
                        "dip_execution",
                        json!({
                            "status": "success",
                            "tx_hash": submitted.receipt.transaction_hash,
                            "usd_amount": self.buy_amount,
                            "btc_amount": btc_amount,
                            "price": sample.price,
                        }),
                    ),
                );
                Ok(Outcome::Success)
            }
            Err(e) => {
                let message = e.to_string();
                if let SubmitError::Unconfirmed { .. } = e {
                    // Funds may have moved; be conservative and start the
                    // cooldown anyway rather than risk a double buy.
                    self.last_dip_buy = Some(now);
                }
                emit(
                    self.sink.as_ref(),
                    Event::new(
                        "dip_execution",
                        json!({"status": "failed", "error": message}),
                    ),
                );
                Ok(Outcome::Failed(message))
            }
        }
    }
}
