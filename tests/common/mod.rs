#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use basestack_agent::chain::{ChainClient, RawTx, TxSigner};
use basestack_agent::domain::{
    IntentKind, PriceSample, PriceSource, Receipt, TransactionIntent, TxRequest,
};
use basestack_agent::events::{Event, EventSink};
use basestack_agent::oracle::PriceOracle;
use basestack_agent::venue::{IdleBalances, Venue, VenueAsset};

/// Scripted behavior for one broadcast.
#[derive(Clone)]
pub enum SubmitScript {
    /// Accepted into the mempool; receipt status = `confirm`.
    Accept { confirm: bool },
    /// Rejected at broadcast with this node error message.
    Reject(String),
    /// Accepted but never mined within any wait.
    NeverMined,
}

enum ReceiptPlan {
    Confirm,
    Revert,
    Never,
}

pub struct MockChain {
    nonce_counter: Mutex<u64>,
    pub nonce_calls: Mutex<u32>,
    gas: u128,
    pub gas_calls: Mutex<u32>,
    /// When set, gas price reads fail after this many successful ones.
    pub fail_gas_after: Mutex<Option<u32>>,
    script: Mutex<VecDeque<SubmitScript>>,
    pending: Mutex<Option<ReceiptPlan>>,
    pub submit_count: Mutex<u32>,
}

impl MockChain {
    pub fn new(start_nonce: u64, gas: u128, script: Vec<SubmitScript>) -> Self {
        Self {
            nonce_counter: Mutex::new(start_nonce),
            nonce_calls: Mutex::new(0),
            gas,
            gas_calls: Mutex::new(0),
            fail_gas_after: Mutex::new(None),
            script: Mutex::new(script.into()),
            pending: Mutex::new(None),
            submit_count: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn nonce(&self, _address: &str) -> Result<u64> {
        *self.nonce_calls.lock().unwrap() += 1;
        let mut n = self.nonce_counter.lock().unwrap();
        let v = *n;
        *n += 1;
        Ok(v)
    }

    async fn gas_price(&self) -> Result<u128> {
        let mut calls = self.gas_calls.lock().unwrap();
        *calls += 1;
        if let Some(limit) = *self.fail_gas_after.lock().unwrap() {
            if *calls > limit {
                return Err(anyhow!("internal error"));
            }
        }
        Ok(self.gas)
    }

    async fn submit(&self, _raw: &[u8]) -> Result<String> {
        let mut count = self.submit_count.lock().unwrap();
        *count += 1;
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitScript::Accept { confirm: true });
        match step {
            SubmitScript::Reject(msg) => Err(anyhow!(msg)),
            SubmitScript::Accept { confirm } => {
                *self.pending.lock().unwrap() = Some(if confirm {
                    ReceiptPlan::Confirm
                } else {
                    ReceiptPlan::Revert
                });
                Ok(format!("0xhash{count}"))
            }
            SubmitScript::NeverMined => {
                *self.pending.lock().unwrap() = Some(ReceiptPlan::Never);
                Ok(format!("0xhash{count}"))
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &str, _timeout: Duration) -> Result<Option<Receipt>> {
        match self.pending.lock().unwrap().as_ref() {
            Some(ReceiptPlan::Confirm) => Ok(Some(Receipt {
                transaction_hash: tx_hash.to_string(),
                status: true,
                block_number: Some(1),
                gas_used: Some(21_000),
            })),
            Some(ReceiptPlan::Revert) => Ok(Some(Receipt {
                transaction_hash: tx_hash.to_string(),
                status: false,
                block_number: Some(1),
                gas_used: Some(21_000),
            })),
            Some(ReceiptPlan::Never) | None => Ok(None),
        }
    }
}

/// Signer that records every request it was asked to sign.
#[derive(Default)]
pub struct RecordingSigner {
    pub requests: Mutex<Vec<TxRequest>>,
}

#[async_trait]
impl TxSigner for RecordingSigner {
    fn address(&self) -> &str {
        "0x00000000000000000000000000000000000000aa"
    }

    async fn sign(&self, tx: &TxRequest) -> Result<RawTx> {
        self.requests.lock().unwrap().push(tx.clone());
        Ok(vec![0xde, 0xad])
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn of_kind(&self, kind: &str) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl EventSink for MemorySink {
    fn append(&self, event: Event) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Oracle fed from a script of prices; `None` entries model feed outages.
/// When the script runs dry it keeps returning the last scripted value.
pub struct ScriptedOracle {
    prices: Mutex<VecDeque<Option<f64>>>,
    last: Mutex<Option<f64>>,
}

impl ScriptedOracle {
    pub fn new(prices: Vec<Option<f64>>) -> Self {
        Self {
            prices: Mutex::new(prices.into()),
            last: Mutex::new(None),
        }
    }

    pub fn constant(price: f64) -> Self {
        Self::new(vec![Some(price)])
    }

    pub fn push(&self, price: Option<f64>) {
        self.prices.lock().unwrap().push_back(price);
    }
}

#[async_trait]
impl PriceOracle for ScriptedOracle {
    async fn current_price(&self) -> Result<Option<PriceSample>> {
        let next = self.prices.lock().unwrap().pop_front();
        let price = match next {
            Some(p) => {
                *self.last.lock().unwrap() = p;
                p
            }
            None => *self.last.lock().unwrap(),
        };
        Ok(price.map(|p| PriceSample {
            price: p,
            confidence: None,
            observed_at: Utc::now(),
            source: PriceSource::Test,
        }))
    }
}

fn noop_intent(kind: IntentKind, amount: f64, asset: &str, min_out: f64) -> TransactionIntent {
    TransactionIntent {
        kind,
        input_amount: amount,
        input_asset: asset.to_string(),
        min_output: min_out,
        deadline: None,
        builder: Box::new(|nonce, gas_price| TxRequest {
            to: "0x00000000000000000000000000000000000000ee".to_string(),
            value: 0,
            data: Vec::new(),
            nonce,
            gas_price,
            gas_limit: 21_000,
        }),
    }
}

pub fn simple_swap_intent(amount: f64, min_out: f64) -> TransactionIntent {
    noop_intent(IntentKind::Swap, amount, "USDC", min_out)
}

/// Venue that records the intents it was asked to build.
pub struct MockVenue {
    pub balances: Mutex<IdleBalances>,
    pub lp: Mutex<f64>,
    pub rewards: Mutex<f64>,
    pub swaps: Mutex<Vec<(f64, f64)>>,
    pub liquidity_adds: Mutex<Vec<(f64, f64)>>,
    pub stakes: Mutex<Vec<f64>>,
    pub claims: Mutex<u32>,
    pub reinvests: Mutex<Vec<f64>>,
    /// When set, the next approval check reports a missing allowance once.
    pub require_approval: Mutex<bool>,
    pub approval_requests: Mutex<Vec<(VenueAsset, f64)>>,
}

impl MockVenue {
    pub fn new(btc: f64, usdc: f64) -> Self {
        Self {
            balances: Mutex::new(IdleBalances { btc, usdc }),
            lp: Mutex::new(0.0),
            rewards: Mutex::new(0.0),
            swaps: Mutex::new(Vec::new()),
            liquidity_adds: Mutex::new(Vec::new()),
            stakes: Mutex::new(Vec::new()),
            claims: Mutex::new(0),
            reinvests: Mutex::new(Vec::new()),
            require_approval: Mutex::new(false),
            approval_requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Venue for MockVenue {
    async fn idle_balances(&self) -> Result<IdleBalances> {
        Ok(*self.balances.lock().unwrap())
    }

    async fn lp_balance(&self) -> Result<f64> {
        Ok(*self.lp.lock().unwrap())
    }

    async fn pending_rewards(&self) -> Result<f64> {
        Ok(*self.rewards.lock().unwrap())
    }

    async fn approval_intent(
        &self,
        asset: VenueAsset,
        amount: f64,
    ) -> Result<Option<TransactionIntent>> {
        self.approval_requests.lock().unwrap().push((asset, amount));
        let mut required = self.require_approval.lock().unwrap();
        if *required {
            *required = false;
            let label = match asset {
                VenueAsset::Btc => "cbBTC",
                VenueAsset::Usdc => "USDC",
                VenueAsset::Reward => "AERO",
                VenueAsset::Lp => "LP",
            };
            Ok(Some(noop_intent(IntentKind::Approve, amount, label, 0.0)))
        } else {
            Ok(None)
        }
    }

    fn swap_usdc_for_btc(
        &self,
        usdc_amount: f64,
        min_btc_out: f64,
        _deadline: DateTime<Utc>,
    ) -> TransactionIntent {
        self.swaps.lock().unwrap().push((usdc_amount, min_btc_out));
        noop_intent(IntentKind::Swap, usdc_amount, "USDC", min_btc_out)
    }

    fn add_liquidity(
        &self,
        btc_amount: f64,
        usdc_amount: f64,
        _deadline: DateTime<Utc>,
    ) -> TransactionIntent {
        self.liquidity_adds
            .lock()
            .unwrap()
            .push((btc_amount, usdc_amount));
        noop_intent(IntentKind::AddLiquidity, usdc_amount, "USDC", 0.0)
    }

    fn stake_lp(&self, lp_amount: f64) -> TransactionIntent {
        self.stakes.lock().unwrap().push(lp_amount);
        noop_intent(IntentKind::StakeLp, lp_amount, "LP", 0.0)
    }

    fn claim_rewards(&self) -> TransactionIntent {
        *self.claims.lock().unwrap() += 1;
        noop_intent(IntentKind::ClaimRewards, 0.0, "AERO", 0.0)
    }

    fn swap_rewards_for_btc(
        &self,
        reward_amount: f64,
        _deadline: DateTime<Utc>,
    ) -> TransactionIntent {
        self.reinvests.lock().unwrap().push(reward_amount);
        noop_intent(IntentKind::Swap, reward_amount, "AERO", 0.0)
    }
}
