use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Pyth,
    Onchain,
    Test,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: f64,
    /// Confidence band around the price, when the feed reports one.
    pub confidence: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub source: PriceSource,
}

/// Fixed-capacity, time-ordered window of price samples.
///
/// Appending past capacity evicts the oldest sample. Each strategy owns its
/// window; there is no shared price history.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    samples: VecDeque<PriceSample>,
    capacity: usize,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: PriceSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&PriceSample> {
        self.samples.back()
    }

    /// Mean over the up-to-`n` samples immediately preceding the newest one.
    ///
    /// Returns `None` while the window holds fewer than two samples.
    pub fn trailing_mean_excluding_latest(&self, n: usize) -> Option<f64> {
        let len = self.samples.len();
        if len < 2 || n == 0 {
            return None;
        }
        let take = n.min(len - 1);
        let sum: f64 = self
            .samples
            .iter()
            .skip(len - 1 - take)
            .take(take)
            .map(|s| s.price)
            .sum();
        Some(sum / take as f64)
    }
}

/// Result of one strategy execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Approve,
    Swap,
    AddLiquidity,
    StakeLp,
    ClaimRewards,
}

/// Unsigned transaction parameters handed to the signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    pub to: String,
    pub value: u128,
    pub data: Vec<u8>,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

pub type TxBuilder = Box<dyn Fn(u64, u128) -> TxRequest + Send + Sync>;

/// Immutable description of a desired on-chain effect.
///
/// Created by a strategy, consumed exactly once by the submission engine.
/// `builder` is a pure function from (nonce, gas price) to an unsigned
/// transaction, so the engine can rebuild the payload on every attempt.
pub struct TransactionIntent {
    pub kind: IntentKind,
    pub input_amount: f64,
    pub input_asset: String,
    pub min_output: f64,
    pub deadline: Option<DateTime<Utc>>,
    pub builder: TxBuilder,
}

impl fmt::Debug for TransactionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionIntent")
            .field("kind", &self.kind)
            .field("input_amount", &self.input_amount)
            .field("input_asset", &self.input_asset)
            .field("min_output", &self.min_output)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_hash: String,
    /// true = executed successfully, false = reverted.
    pub status: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Confirmed,
    RetryableFailure,
    FatalFailure,
}

/// One submission attempt inside the engine's retry loop.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub nonce: u64,
    pub gas_price: u128,
    pub submitted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
}

/// Per-strategy scheduling state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleState {
    pub last_execution: Option<DateTime<Utc>>,
    pub next_eligible: DateTime<Utc>,
    pub enabled: bool,
}

impl ScheduleState {
    pub fn new(next_eligible: DateTime<Utc>, enabled: bool) -> Self {
        Self {
            last_execution: None,
            next_eligible,
            enabled,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && now >= self.next_eligible
    }

    pub fn advance(&mut self, executed_at: DateTime<Utc>, next_eligible: DateTime<Utc>) {
        self.last_execution = Some(executed_at);
        self.next_eligible = next_eligible;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(price: f64) -> PriceSample {
        PriceSample {
            price,
            confidence: None,
            observed_at: Utc::now(),
            source: PriceSource::Test,
        }
    }

    #[test]
    fn window_evicts_oldest_at_capacity() {
        let mut w = PriceWindow::new(3);
        for p in [1.0, 2.0, 3.0, 4.0] {
            w.push(sample(p));
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.latest().unwrap().price, 4.0);
        // 1.0 was evicted; mean over the two surviving preceding samples
        assert_eq!(w.trailing_mean_excluding_latest(6), Some(2.5));
    }

    #[test]
    fn trailing_mean_excludes_current_sample() {
        let mut w = PriceWindow::new(24);
        for p in [60_000.0; 6] {
            w.push(sample(p));
        }
        w.push(sample(56_000.0));
        assert_eq!(w.trailing_mean_excluding_latest(6), Some(60_000.0));
    }

    #[test]
    fn trailing_mean_needs_a_preceding_sample() {
        let mut w = PriceWindow::new(24);
        assert_eq!(w.trailing_mean_excluding_latest(6), None);
        w.push(sample(1.0));
        assert_eq!(w.trailing_mean_excluding_latest(6), None);
        w.push(sample(2.0));
        assert_eq!(w.trailing_mean_excluding_latest(6), Some(1.0));
    }
}
