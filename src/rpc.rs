use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use crate::chain::{ChainClient, RawTx, TxSigner};
use crate::domain::{Receipt, TxRequest};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Plain EVM JSON-RPC client over HTTP.
#[derive(Clone)]
pub struct EvmRpcClient {
    url: String,
    http: Client,
}

impl EvmRpcClient {
    pub fn new(url: String) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp: Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = resp.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown rpc error");
            return Err(anyhow!("{method} failed: {message}"));
        }
        resp.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("{method}: missing result"))
    }

    /// eth_call against a contract, returning the raw hex result.
    pub async fn eth_call(&self, to: &str, data: &str) -> Result<String> {
        let result = self
            .call("eth_call", json!([{"to": to, "data": data}, "latest"]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("eth_call: non-string result"))
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    async fn nonce(&self, address: &str) -> Result<u64> {
        let result = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_getTransactionCount: non-string result"))?;
        Ok(parse_hex_quantity(hex)? as u64)
    }

    async fn gas_price(&self) -> Result<u128> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_gasPrice: non-string result"))?;
        parse_hex_quantity(hex)
    }

    async fn submit(&self, raw: &[u8]) -> Result<String> {
        let result = self
            .call("eth_sendRawTransaction", json!([to_hex_bytes(raw)]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("eth_sendRawTransaction: non-string result"))
    }

    async fn wait_for_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<Option<Receipt>> {
        let deadline = Instant::now() + timeout;
        loop {
            let result = self
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !result.is_null() {
                return Ok(Some(parse_receipt(&result)?));
            }
            if Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Ok(None);
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

fn parse_receipt(v: &Value) -> Result<Receipt> {
    let hash = v
        .get("transactionHash")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("receipt missing transactionHash"))?;
    let status = v
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s == "0x1")
        .unwrap_or(false);
    let block_number = v
        .get("blockNumber")
        .and_then(Value::as_str)
        .and_then(|s| parse_hex_quantity(s).ok())
        .map(|n| n as u64);
    let gas_used = v
        .get("gasUsed")
        .and_then(Value::as_str)
        .and_then(|s| parse_hex_quantity(s).ok())
        .map(|n| n as u64);
    Ok(Receipt {
        transaction_hash: hash.to_string(),
        status,
        block_number,
        gas_used,
    })
}

/// Signer that delegates to the node's unlocked account via
/// eth_signTransaction (remote-signer deployment; no key material here).
pub struct NodeSigner {
    rpc: EvmRpcClient,
    address: String,
    chain_id: u64,
}

impl NodeSigner {
    pub fn new(rpc: EvmRpcClient, address: String, chain_id: u64) -> Self {
        Self {
            rpc,
            address,
            chain_id,
        }
    }
}

#[async_trait]
impl TxSigner for NodeSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, tx: &TxRequest) -> Result<RawTx> {
        let result = self
            .rpc
            .call(
                "eth_signTransaction",
                json!([{
                    "from": self.address,
                    "to": tx.to,
                    "value": to_hex_quantity(tx.value),
                    "data": to_hex_bytes(&tx.data),
                    "nonce": to_hex_quantity(tx.nonce as u128),
                    "gasPrice": to_hex_quantity(tx.gas_price),
                    "gas": to_hex_quantity(tx.gas_limit as u128),
                    "chainId": to_hex_quantity(self.chain_id as u128),
                }]),
            )
            .await?;
        let raw = result
            .get("raw")
            .and_then(Value::as_str)
            .or_else(|| result.as_str())
            .ok_or_else(|| anyhow!("eth_signTransaction: missing raw tx"))?;
        parse_hex_bytes(raw)
    }
}

pub fn to_hex_quantity(v: u128) -> String {
    format!("{v:#x}")
}

pub fn parse_hex_quantity(s: &str) -> Result<u128> {
    let trimmed = s.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16).map_err(|e| anyhow!("bad hex quantity {s:?}: {e}"))
}

pub fn to_hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.trim_start_matches("0x");
    if trimmed.len() % 2 != 0 {
        return Err(anyhow!("odd-length hex string"));
    }
    (0..trimmed.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&trimmed[i..i + 2], 16)
                .map_err(|e| anyhow!("bad hex byte at {i}: {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_quantity_round_trip() {
        assert_eq!(to_hex_quantity(0), "0x0");
        assert_eq!(to_hex_quantity(1_000_000_007), "0x3b9aca07");
        assert_eq!(parse_hex_quantity("0x3b9aca07").unwrap(), 1_000_000_007);
        assert_eq!(parse_hex_quantity("0x").unwrap(), 0);
        assert!(parse_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn hex_bytes_round_trip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        let hex = to_hex_bytes(&bytes);
        assert_eq!(hex, "0xdeadbeef");
        assert_eq!(parse_hex_bytes(&hex).unwrap(), bytes);
        assert!(parse_hex_bytes("0xabc").is_err());
    }

    #[test]
    fn receipt_status_parses_success_flag() {
        let v = json!({
            "transactionHash": "0xabc",
            "status": "0x1",
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
        });
        let r = parse_receipt(&v).unwrap();
        assert!(r.status);
        assert_eq!(r.block_number, Some(16));
        assert_eq!(r.gas_used, Some(21000));

        let failed = json!({"transactionHash": "0xabc", "status": "0x0"});
        assert!(!parse_receipt(&failed).unwrap().status);
    }
}
