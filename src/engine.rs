use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{ChainClient, TxSigner};
use crate::domain::{AttemptOutcome, AttemptRecord, Receipt, TransactionIntent, TxRequest};
use crate::events::{emit, Event, EventSink};
use crate::retry::{is_nonce_error, is_retryable, retry_async, CancelToken};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Non-retryable rejection or revert; the cycle is spent.
    #[error("fatal transaction failure: {0}")]
    Fatal(String),
    /// Every attempt was rejected before acceptance; the cycle is spent.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    /// A transaction was broadcast but never confirmed within the extended
    /// wait. Funds may still move; callers must not treat the cycle as done.
    #[error("transaction unconfirmed after {attempts} attempts, last hash {last_hash}")]
    Unconfirmed { attempts: u32, last_hash: String },
    /// Chain reads (nonce/gas) unavailable before any attempt was made;
    /// nothing was broadcast this cycle. A read failure after a broadcast
    /// surfaces as `Unconfirmed` instead.
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),
    #[error("submission cancelled during shutdown")]
    Cancelled,
}

impl SubmitError {
    /// True when a broadcast transaction may still confirm behind our back.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Unconfirmed { .. } | Self::Cancelled)
    }
}

#[derive(Debug)]
pub struct Submitted {
    pub receipt: Receipt,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone)]
pub struct EngineParams {
    pub max_retries: u32,
    pub gas_bump_percent: u32,
    pub receipt_timeout: Duration,
    pub receipt_extended_timeout: Duration,
    pub dry_run: bool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            max_retries: 3,
            gas_bump_percent: 10,
            receipt_timeout: Duration::from_secs(120),
            receipt_extended_timeout: Duration::from_secs(300),
            dry_run: false,
        }
    }
}

enum AttemptStep {
    Confirmed(Receipt),
    /// Broadcast but not mined within the extended wait.
    Unmined(String),
    Failed(String),
}

/// Bounded retry loop around one transaction intent's lifecycle.
///
/// Owns the account nonce for the duration of one intent: fetched up front,
/// refetched only after a nonce-classified failure so that gas-escalated
/// retries replace the stuck transaction instead of queueing a duplicate.
pub struct SubmissionEngine {
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn TxSigner>,
    sink: Arc<dyn EventSink>,
    cancel: CancelToken,
    params: EngineParams,
}

impl SubmissionEngine {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn TxSigner>,
        sink: Arc<dyn EventSink>,
        cancel: CancelToken,
        params: EngineParams,
    ) -> Self {
        Self {
            chain,
            signer,
            sink,
            cancel,
            params,
        }
    }

    /// Submits the intent, retrying retryable failures with escalating gas.
    ///
    /// Gas multiplier is `1 + bump/100 * attempt`, monotone across the whole
    /// sequence. Backoff between attempts is 2^attempt seconds, preemptible
    /// via the cancel token. Fatal failures short-circuit with exactly one
    /// attempt record and no backoff.
    pub async fn submit(&self, intent: TransactionIntent) -> Result<Submitted, SubmitError> {
        if self.params.dry_run {
            return self.dry_run_submit(&intent);
        }

        let address = self.signer.address().to_string();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut attempt: u32 = 0;
        let mut nonce = self.fetch_nonce(&address).await?;
        let mut last_hash: Option<String> = None;

        loop {
            let base_gas = match self.fetch_gas_price().await {
                Ok(gas) => gas,
                Err(e) => return Err(self.read_failure(e, &intent, attempts, last_hash)),
            };
            // 1 + bump/100 * attempt, in integer math; monotone across the
            // whole sequence since attempt never resets.
            let gas_price = base_gas
                + base_gas * u128::from(self.params.gas_bump_percent) * u128::from(attempt) / 100;
            let tx = (intent.builder)(nonce, gas_price);
            let submitted_at = Utc::now();
            info!(
                kind = ?intent.kind,
                attempt,
                nonce,
                gas_price,
                "submitting transaction"
            );

            match self.try_once(&tx).await {
                AttemptStep::Confirmed(receipt) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        nonce,
                        gas_price,
                        submitted_at,
                        outcome: AttemptOutcome::Confirmed,
                        error: None,
                    });
                    info!(tx_hash = %receipt.transaction_hash, attempt, "transaction confirmed");
                    self.emit_terminal(
                        "confirmed",
                        &intent,
                        &attempts,
                        Some(receipt.transaction_hash.as_str()),
                        None,
                    );
                    return Ok(Submitted { receipt, attempts });
                }
                AttemptStep::Unmined(hash) => {
                    warn!(tx_hash = %hash, attempt, "transaction unconfirmed after extended wait");
                    attempts.push(AttemptRecord {
                        attempt,
                        nonce,
                        gas_price,
                        submitted_at,
                        outcome: AttemptOutcome::Pending,
                        error: Some("confirmation timeout".to_string()),
                    });
                    last_hash = Some(hash);
                    if attempt >= self.params.max_retries {
                        let last_hash = last_hash.unwrap_or_default();
                        self.emit_terminal(
                            "unconfirmed",
                            &intent,
                            &attempts,
                            Some(last_hash.as_str()),
                            Some("confirmation timeout"),
                        );
                        return Err(SubmitError::Unconfirmed {
                            attempts: attempts.len() as u32,
                            last_hash,
                        });
                    }
                    // Same nonce on the next attempt: the escalated
                    // replacement supersedes the stuck transaction.
                }
                AttemptStep::Failed(message) => {
                    let retryable = is_retryable(&message);
                    attempts.push(AttemptRecord {
                        attempt,
                        nonce,
                        gas_price,
                        submitted_at,
                        outcome: if retryable {
                            AttemptOutcome::RetryableFailure
                        } else {
                            AttemptOutcome::FatalFailure
                        },
                        error: Some(message.clone()),
                    });
                    if !retryable {
                        warn!(attempt, error = %message, "fatal transaction failure");
                        self.emit_terminal("failed", &intent, &attempts, None, Some(&message));
                        return Err(SubmitError::Fatal(message));
                    }
                    if attempt >= self.params.max_retries {
                        warn!(attempt, error = %message, "retries exhausted");
                        self.emit_terminal("failed", &intent, &attempts, None, Some(&message));
                        return Err(SubmitError::RetriesExhausted {
                            attempts: attempts.len() as u32,
                            last_error: message,
                        });
                    }
                    if is_nonce_error(&message) {
                        nonce = match self.fetch_nonce(&address).await {
                            Ok(n) => n,
                            Err(e) => {
                                return Err(self.read_failure(e, &intent, attempts, last_hash))
                            }
                        };
                    }
                }
            }

            attempt += 1;
            // Pure exponential backoff, attempt-indexed; jitter is reserved
            // for the generic retry helper.
            let backoff = Duration::from_secs(1u64 << attempt.min(6));
            warn!(attempt, backoff_secs = backoff.as_secs(), "backing off before retry");
            if !self.cancel.sleep(backoff).await {
                self.emit_terminal(
                    "cancelled",
                    &intent,
                    &attempts,
                    last_hash.as_deref(),
                    None,
                );
                return Err(SubmitError::Cancelled);
            }
        }
    }

    async fn try_once(&self, tx: &TxRequest) -> AttemptStep {
        let raw = match self.signer.sign(tx).await {
            Ok(raw) => raw,
            Err(e) => return AttemptStep::Failed(format!("signing failed: {e:#}")),
        };
        let hash = match self.chain.submit(&raw).await {
            Ok(h) => h,
            Err(e) => return AttemptStep::Failed(format!("{e:#}")),
        };
        info!(tx_hash = %hash, "transaction broadcast");

        match self
            .chain
            .wait_for_receipt(&hash, self.params.receipt_timeout)
            .await
        {
            Ok(Some(receipt)) => return Self::settle(receipt),
            Ok(None) => {
                // Slow-but-mining transactions must not be wastefully
                // duplicated; give it one extended wait first.
                warn!(tx_hash = %hash, "no receipt within timeout, extending wait");
            }
            Err(e) => return AttemptStep::Failed(format!("receipt poll failed: {e:#}")),
        }

        match self
            .chain
            .wait_for_receipt(&hash, self.params.receipt_extended_timeout)
            .await
        {
            Ok(Some(receipt)) => Self::settle(receipt),
            Ok(None) => AttemptStep::Unmined(hash),
            Err(e) => AttemptStep::Failed(format!("receipt poll failed: {e:#}")),
        }
    }

    fn settle(receipt: Receipt) -> AttemptStep {
        if receipt.status {
            AttemptStep::Confirmed(receipt)
        } else {
            AttemptStep::Failed(format!(
                "execution reverted (tx {})",
                receipt.transaction_hash
            ))
        }
    }

    fn dry_run_submit(&self, intent: &TransactionIntent) -> Result<Submitted, SubmitError> {
        let tx = (intent.builder)(0, 0);
        info!(kind = ?intent.kind, to = %tx.to, "dry_run: skipping signing and broadcast");
        self.emit_terminal("dry_run", intent, &[], None, None);
        Ok(Submitted {
            receipt: Receipt {
                transaction_hash: "DRY_RUN".to_string(),
                status: true,
                block_number: None,
                gas_used: None,
            },
            attempts: Vec::new(),
        })
    }

    /// A chain read failed mid-sequence. With no attempts yet this is a
    /// clean `ChainUnavailable`; once attempts exist a broadcast may still
    /// confirm behind our back, so the result is `Unconfirmed` and the
    /// accumulated attempt history is journaled rather than dropped.
    fn read_failure(
        &self,
        err: SubmitError,
        intent: &TransactionIntent,
        attempts: Vec<AttemptRecord>,
        last_hash: Option<String>,
    ) -> SubmitError {
        if attempts.is_empty() {
            return err;
        }
        let last_hash = last_hash.unwrap_or_default();
        warn!(
            error = %err,
            attempts = attempts.len(),
            "chain read failed with attempts outstanding"
        );
        self.emit_terminal(
            "unconfirmed",
            intent,
            &attempts,
            Some(last_hash.as_str()),
            Some(&err.to_string()),
        );
        SubmitError::Unconfirmed {
            attempts: attempts.len() as u32,
            last_hash,
        }
    }

    async fn fetch_nonce(&self, address: &str) -> Result<u64, SubmitError> {
        let chain = self.chain.clone();
        let address = address.to_string();
        retry_async(
            move |_| {
                let chain = chain.clone();
                let address = address.clone();
                async move { chain.nonce(&address).await }
            },
            3,
            Duration::from_millis(200),
        )
        .await
        .map_err(|e| SubmitError::ChainUnavailable(format!("nonce fetch failed: {e:#}")))
    }

    async fn fetch_gas_price(&self) -> Result<u128, SubmitError> {
        let chain = self.chain.clone();
        retry_async(
            move |_| {
                let chain = chain.clone();
                async move { chain.gas_price().await }
            },
            3,
            Duration::from_millis(200),
        )
        .await
        .map_err(|e| SubmitError::ChainUnavailable(format!("gas price fetch failed: {e:#}")))
    }

    fn emit_terminal(
        &self,
        status: &str,
        intent: &TransactionIntent,
        attempts: &[AttemptRecord],
        tx_hash: Option<&str>,
        error: Option<&str>,
    ) {
        emit(
            self.sink.as_ref(),
            Event::new(
                "transaction",
                json!({
                    "status": status,
                    "kind": intent.kind,
                    "input_amount": intent.input_amount,
                    "input_asset": intent.input_asset,
                    "tx_hash": tx_hash,
                    "attempts": attempts,
                    "error": error,
                }),
            ),
        );
    }
}
