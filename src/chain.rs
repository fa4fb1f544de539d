use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Receipt, TxRequest};

pub type RawTx = Vec<u8>;

/// Chain access consumed by the submission engine.
///
/// Implementations surface node error messages verbatim in their `Err`
/// variants; the retry layer classifies them by substring.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn nonce(&self, address: &str) -> Result<u64>;
    async fn gas_price(&self) -> Result<u128>;
    /// Broadcasts a signed transaction, returning its hash.
    async fn submit(&self, raw: &[u8]) -> Result<String>;
    /// Polls for a receipt. `Ok(None)` means the transaction was not mined
    /// within `timeout`; the caller decides whether to extend the wait.
    async fn wait_for_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<Option<Receipt>>;
}

/// Wallet signing seam. Key custody lives outside the core.
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> &str;
    async fn sign(&self, tx: &TxRequest) -> Result<RawTx>;
}
