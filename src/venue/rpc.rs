//! JSON-RPC balance reader.
//!
//! Reads native (`eth_getBalance`) and ERC-20 (`balanceOf` via `eth_call`)
//! balances for a whole wallet batch in a single JSON-RPC batch request.
//! Chains without a configured endpoint are delegated to a fallback source.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{BalanceSource, PoolKey, WalletBalance};

/// `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Balance source backed by EVM JSON-RPC endpoints, one per chain id.
pub struct JsonRpcBalances {
    http: Client,
    endpoints: HashMap<String, String>,
    fallback: Option<Arc<dyn BalanceSource>>,
}

impl JsonRpcBalances {
    pub fn new(endpoints: HashMap<String, String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("MMBOT/0.1.0 (market-making-engine)")
            .build()
            .context("Failed to build HTTP client for JSON-RPC")?;

        Ok(Self {
            http,
            endpoints,
            fallback: None,
        })
    }

    /// Route chains without an endpoint to `fallback` instead of failing.
    pub fn with_fallback(mut self, fallback: Arc<dyn BalanceSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    async fn fetch(&self, url: &str, token: &str, addresses: &[String]) -> Result<Vec<WalletBalance>> {
        let batch = build_batch(token, addresses);
        debug!(url, wallets = addresses.len(), "Fetching balances over JSON-RPC");

        let resp = self
            .http
            .post(url)
            .json(&batch)
            .send()
            .await
            .context("JSON-RPC request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("JSON-RPC error {status}: {body}");
        }

        let responses: Vec<RpcResponse> = resp
            .json()
            .await
            .context("Failed to parse JSON-RPC batch response")?;

        collect_balances(responses, addresses.len())
    }
}

#[async_trait]
impl BalanceSource for JsonRpcBalances {
    async fn balances(&self, pool: &PoolKey, addresses: &[String]) -> Result<Vec<WalletBalance>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        match (self.endpoints.get(&pool.chain_id), &self.fallback) {
            (Some(url), _) => self.fetch(url, &pool.token, addresses).await,
            (None, Some(fallback)) => fallback.balances(pool, addresses).await,
            (None, None) => Err(anyhow!("No RPC endpoint configured for chain {}", pool.chain_id)),
        }
    }
}

/// Two calls per wallet: id `2i` is the native balance, `2i + 1` the token.
fn build_batch(token: &str, addresses: &[String]) -> Vec<Value> {
    let mut batch = Vec::with_capacity(addresses.len() * 2);
    for (i, address) in addresses.iter().enumerate() {
        batch.push(json!({
            "jsonrpc": "2.0",
            "id": 2 * i,
            "method": "eth_getBalance",
            "params": [address, "latest"],
        }));
        batch.push(json!({
            "jsonrpc": "2.0",
            "id": 2 * i + 1,
            "method": "eth_call",
            "params": [{ "to": token, "data": balance_of_calldata(address) }, "latest"],
        }));
    }
    batch
}

fn balance_of_calldata(address: &str) -> String {
    let raw = address.trim_start_matches("0x").to_lowercase();
    format!("{BALANCE_OF_SELECTOR}{raw:0>64}")
}

fn collect_balances(responses: Vec<RpcResponse>, wallets: usize) -> Result<Vec<WalletBalance>> {
    let mut balances = vec![WalletBalance::default(); wallets];
    let mut seen = vec![false; wallets * 2];

    for resp in responses {
        let id = usize::try_from(resp.id).context("JSON-RPC id out of range")?;
        if id >= wallets * 2 {
            bail!("Unexpected JSON-RPC response id {id}");
        }
        if let Some(err) = resp.error {
            bail!("JSON-RPC call {id} failed ({}): {}", err.code, err.message);
        }
        let hex = resp
            .result
            .ok_or_else(|| anyhow!("JSON-RPC call {id} returned no result"))?;
        let value = parse_quantity(&hex)?;
        let slot = &mut balances[id / 2];
        if id % 2 == 0 {
            slot.native = value;
        } else {
            slot.token = value;
        }
        seen[id] = true;
    }

    if let Some(missing) = seen.iter().position(|s| !s) {
        bail!("JSON-RPC batch missing response for call {missing}");
    }
    Ok(balances)
}

/// Parse a hex quantity or a 32-byte ABI word into a `u128`.
fn parse_quantity(hex: &str) -> Result<u128> {
    let digits = hex.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("Balance does not fit in u128: {hex}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
