//! Private relay integration (Flashbots-style JSON-RPC)
//!
//! `PrivateRelay` is the seam the executor talks to: simulate a bundle,
//! submit it for a block range, poll its status. `FlashbotsClient` speaks
//! `eth_callBundle` / `eth_sendBundle` to the relay and checks inclusion
//! with transaction receipts against a regular RPC node.

use crate::bundle::BundleTransaction;
use async_trait::async_trait;
use ethers::core::types::transaction::eip2718::TypedTransaction;
use ethers::core::types::{Address, Bytes, Eip1559TransactionRequest, H256, U256};
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::keccak256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Relay-assigned bundle identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleId(pub String);

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a private simulation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub success: bool,
    pub revert_reason: Option<String>,
    /// Net profit reported by the relay, before gas
    pub profit: Decimal,
    pub gas_used: u64,
    /// Searcher balance deltas keyed by lowercase token address, in whole tokens
    pub state_diff: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleStatus {
    Pending,
    Included { block_number: u64 },
    Expired,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay transport error: {0}")]
    Transport(String),

    #[error("Relay returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed relay response: {0}")]
    InvalidResponse(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Unknown bundle {0}")]
    UnknownBundle(BundleId),
}

/// Private bundle relay (simulate-then-submit)
#[async_trait]
pub trait PrivateRelay: Send + Sync {
    async fn simulate_bundle(
        &self,
        transactions: &[BundleTransaction],
    ) -> Result<SimulationOutcome, RelayError>;

    async fn submit_bundle(
        &self,
        transactions: &[BundleTransaction],
        target_blocks: RangeInclusive<u64>,
    ) -> Result<BundleId, RelayError>;

    async fn get_bundle_status(&self, bundle_id: &BundleId) -> Result<BundleStatus, RelayError>;
}

/// Connection settings for the Flashbots client
#[derive(Debug, Clone)]
pub struct FlashbotsConfig {
    pub relay_url: String,
    /// Regular RPC node used for block height and receipts
    pub rpc_url: String,
    pub chain_id: u64,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
struct SubmittedBundle {
    tx_hashes: Vec<H256>,
    last_block: u64,
}

/// Client for Flashbots relay interaction
pub struct FlashbotsClient {
    config: FlashbotsConfig,
    http: reqwest::Client,
    /// Signs the bundle transactions
    tx_signer: LocalWallet,
    /// Signs relay requests (X-Flashbots-Signature); reputation key only
    auth_signer: LocalWallet,
    submitted: RwLock<HashMap<BundleId, SubmittedBundle>>,
}

impl FlashbotsClient {
    pub fn new(
        config: FlashbotsConfig,
        tx_signing_key: &str,
        auth_signing_key: &str,
    ) -> Result<Self, RelayError> {
        let tx_signer = LocalWallet::from_str(tx_signing_key)
            .map_err(|e| RelayError::Signing(e.to_string()))?
            .with_chain_id(config.chain_id);
        let auth_signer = LocalWallet::from_str(auth_signing_key)
            .map_err(|e| RelayError::Signing(e.to_string()))?;

        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(config.request_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        info!(
            "🔐 Flashbots client ready: relay={} searcher={:?}",
            config.relay_url,
            tx_signer.address()
        );

        Ok(Self {
            config,
            http,
            tx_signer,
            auth_signer,
            submitted: RwLock::new(HashMap::new()),
        })
    }

    pub fn get_relay_url(&self) -> &str {
        &self.config.relay_url
    }

    /// Bundles still awaiting a final status
    pub async fn tracked_bundles(&self) -> usize {
        self.submitted.read().await.len()
    }

    /// Stop tracking a bundle once its status can no longer change
    async fn settle(&self, bundle_id: &BundleId, status: BundleStatus) -> BundleStatus {
        if !matches!(status, BundleStatus::Pending) {
            self.submitted.write().await.remove(bundle_id);
        }
        status
    }

    pub fn searcher_address(&self) -> Address {
        self.tx_signer.address()
    }

    fn sign_transaction(&self, tx: &BundleTransaction) -> Result<(Bytes, H256), RelayError> {
        let to = Address::from_str(&tx.to).map_err(|e| RelayError::Signing(e.to_string()))?;
        let data = hex::decode(tx.data.trim_start_matches("0x"))
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        let value =
            U256::from_dec_str(&tx.value).map_err(|e| RelayError::Signing(e.to_string()))?;

        let request = Eip1559TransactionRequest::new()
            .to(to)
            .data(data)
            .value(value)
            .gas(tx.gas_limit)
            .max_fee_per_gas(tx.max_fee_per_gas)
            .max_priority_fee_per_gas(tx.max_priority_fee_per_gas)
            .nonce(tx.nonce)
            .chain_id(self.config.chain_id);
        let typed: TypedTransaction = request.into();

        let signature = self
            .tx_signer
            .sign_transaction_sync(&typed)
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Ok((raw, hash))
    }

    fn sign_all(&self, transactions: &[BundleTransaction]) -> Result<(Vec<String>, Vec<H256>), RelayError> {
        let mut raw_txs = Vec::with_capacity(transactions.len());
        let mut hashes = Vec::with_capacity(transactions.len());
        for tx in transactions {
            let (raw, hash) = self.sign_transaction(tx)?;
            raw_txs.push(format!("0x{}", hex::encode(&raw)));
            hashes.push(hash);
        }
        Ok((raw_txs, hashes))
    }

    /// Signed JSON-RPC call to the relay
    async fn relay_call(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        })
        .to_string();

        let digest = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
        let signature = self
            .auth_signer
            .sign_message(digest)
            .await
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        let header = format!("{:?}:0x{}", self.auth_signer.address(), signature);

        let response = self
            .http
            .post(&self.config.relay_url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", header)
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        Self::unwrap_rpc(response).await
    }

    /// Unsigned JSON-RPC call to the regular node
    async fn node_call(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        Self::unwrap_rpc(response).await
    }

    async fn unwrap_rpc(response: reqwest::Response) -> Result<Value, RelayError> {
        let body: Value = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(RelayError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown relay error")
                    .to_string(),
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| RelayError::InvalidResponse("missing `result`".to_string()))
    }

    async fn block_number(&self) -> Result<u64, RelayError> {
        let result = self.node_call("eth_blockNumber", json!([])).await?;
        result
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| RelayError::InvalidResponse(format!("bad block number {}", result)))
    }
}

fn parse_hex_u64(value: &str) -> Option<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).ok()
}

fn wei_to_native(wei: &str) -> Decimal {
    // Up to 28 digits of wei fits Decimal; larger values clamp to zero
    Decimal::from_str(wei)
        .map(|value| value / Decimal::from(1_000_000_000_000_000_000u64))
        .unwrap_or_default()
}

/// Interpret an `eth_callBundle` result
fn parse_call_bundle(result: &Value) -> Result<SimulationOutcome, RelayError> {
    let legs = result
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::InvalidResponse("callBundle without results".to_string()))?;

    let revert_reason = legs.iter().find_map(|leg| {
        leg.get("error")
            .or_else(|| leg.get("revert"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let gas_used = result
        .get("totalGasUsed")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| {
            legs.iter()
                .filter_map(|leg| leg.get("gasUsed").and_then(Value::as_u64))
                .sum()
        });

    let profit = result
        .get("coinbaseDiff")
        .and_then(Value::as_str)
        .map(wei_to_native)
        .unwrap_or_default();

    let mut state_diff = HashMap::new();
    if let Some(diffs) = result.get("stateDiff").and_then(Value::as_object) {
        for (token, delta) in diffs {
            let delta = match delta {
                Value::String(s) => Decimal::from_str(s).ok(),
                Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                _ => None,
            };
            if let Some(delta) = delta {
                state_diff.insert(token.to_lowercase(), delta);
            }
        }
    }

    Ok(SimulationOutcome {
        success: revert_reason.is_none(),
        revert_reason,
        profit,
        gas_used,
        state_diff,
    })
}

#[async_trait]
impl PrivateRelay for FlashbotsClient {
    async fn simulate_bundle(
        &self,
        transactions: &[BundleTransaction],
    ) -> Result<SimulationOutcome, RelayError> {
        let (raw_txs, _) = self.sign_all(transactions)?;
        let block = self.block_number().await?;

        let result = self
            .relay_call(
                "eth_callBundle",
                json!([{
                    "txs": raw_txs,
                    "blockNumber": format!("0x{:x}", block + 1),
                    "stateBlockNumber": "latest",
                }]),
            )
            .await?;

        let outcome = parse_call_bundle(&result)?;
        debug!(
            "🧪 callBundle: success={} gas_used={} revert={:?}",
            outcome.success, outcome.gas_used, outcome.revert_reason
        );
        Ok(outcome)
    }

    async fn submit_bundle(
        &self,
        transactions: &[BundleTransaction],
        target_blocks: RangeInclusive<u64>,
    ) -> Result<BundleId, RelayError> {
        let (raw_txs, hashes) = self.sign_all(transactions)?;
        let mut bundle_id = None;

        // One eth_sendBundle per target block
        for block in target_blocks.clone() {
            let result = self
                .relay_call(
                    "eth_sendBundle",
                    json!([{
                        "txs": raw_txs,
                        "blockNumber": format!("0x{:x}", block),
                    }]),
                )
                .await?;

            let hash = result
                .get("bundleHash")
                .and_then(Value::as_str)
                .ok_or_else(|| RelayError::InvalidResponse("sendBundle without bundleHash".to_string()))?;
            bundle_id.get_or_insert_with(|| BundleId(hash.to_string()));
        }

        let bundle_id = bundle_id.ok_or_else(|| {
            RelayError::InvalidResponse("empty target block range".to_string())
        })?;

        self.submitted.write().await.insert(
            bundle_id.clone(),
            SubmittedBundle {
                tx_hashes: hashes,
                last_block: *target_blocks.end(),
            },
        );

        info!(
            "📤 Bundle {} submitted for blocks {}..={}",
            bundle_id,
            target_blocks.start(),
            target_blocks.end()
        );
        Ok(bundle_id)
    }

    async fn get_bundle_status(&self, bundle_id: &BundleId) -> Result<BundleStatus, RelayError> {
        let submitted = self
            .submitted
            .read()
            .await
            .get(bundle_id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownBundle(bundle_id.clone()))?;

        // The last leg only lands if the whole bundle landed
        if let Some(last_hash) = submitted.tx_hashes.last() {
            let receipt = self
                .node_call("eth_getTransactionReceipt", json!([format!("{:?}", last_hash)]))
                .await?;
            if let Some(block) = receipt
                .get("blockNumber")
                .and_then(Value::as_str)
                .and_then(parse_hex_u64)
            {
                return Ok(self
                    .settle(bundle_id, BundleStatus::Included { block_number: block })
                    .await);
            }
        }

        let current = self.block_number().await?;
        if current > submitted.last_block {
            warn!("⌛ Bundle {} expired at block {}", bundle_id, current);
            Ok(self.settle(bundle_id, BundleStatus::Expired).await)
        } else {
            Ok(BundleStatus::Pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::LegKind;
    use rust_decimal_macros::dec;

    // Well-known test key (anvil account 0)
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn client() -> FlashbotsClient {
        FlashbotsClient::new(
            FlashbotsConfig {
                relay_url: "https://relay.flashbots.net".to_string(),
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 1,
                request_timeout: Duration::from_secs(2),
            },
            TEST_KEY,
            TEST_KEY,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_successful_call_bundle() {
        let result = json!({
            "bundleHash": "0xabc",
            "coinbaseDiff": "2000000000000000",
            "totalGasUsed": 250000,
            "results": [{"gasUsed": 100000}, {"gasUsed": 150000}],
            "stateDiff": {"0xAbC": "12.5"}
        });
        let outcome = parse_call_bundle(&result).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.gas_used, 250000);
        assert_eq!(outcome.profit, dec!(0.002));
        assert_eq!(outcome.state_diff.get("0xabc"), Some(&dec!(12.5)));
    }

    #[test]
    fn test_parse_reverted_call_bundle() {
        let result = json!({
            "results": [{"gasUsed": 21000}, {"gasUsed": 50000, "error": "execution reverted", "revert": "INSUFFICIENT_OUTPUT_AMOUNT"}]
        });
        let outcome = parse_call_bundle(&result).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.revert_reason.as_deref(), Some("execution reverted"));
        assert_eq!(outcome.gas_used, 71000);
    }

    #[test]
    fn test_sign_transaction_is_deterministic() {
        let client = client();
        let tx = BundleTransaction {
            kind: LegKind::Swap,
            to: "0x7a250d5630b4cf539739df2c5dacb4c659f2488d".to_string(),
            data: "0x38ed1739".to_string(),
            value: "0".to_string(),
            gas_limit: 200_000,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            nonce: 3,
        };
        let (raw_a, hash_a) = client.sign_transaction(&tx).unwrap();
        let (raw_b, hash_b) = client.sign_transaction(&tx).unwrap();
        assert_eq!(raw_a, raw_b);
        assert_eq!(hash_a, hash_b);
        // EIP-1559 envelope
        assert_eq!(raw_a.as_ref()[0], 0x02);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let result = FlashbotsClient::new(
            FlashbotsConfig {
                relay_url: "https://relay.flashbots.net".to_string(),
                rpc_url: "http://localhost:8545".to_string(),
                chain_id: 1,
                request_timeout: Duration::from_secs(2),
            },
            "not-a-key",
            TEST_KEY,
        );
        assert!(matches!(result, Err(RelayError::Signing(_))));
    }

    #[test]
    fn test_settled_bundles_are_forgotten() {
        let client = client();
        tokio_test::block_on(async {
            for id in ["0xa", "0xb"] {
                client.submitted.write().await.insert(
                    BundleId(id.to_string()),
                    SubmittedBundle {
                        tx_hashes: vec![H256::zero()],
                        last_block: 100,
                    },
                );
            }

            let pending = client.settle(&BundleId("0xa".to_string()), BundleStatus::Pending).await;
            assert_eq!(pending, BundleStatus::Pending);
            assert_eq!(client.tracked_bundles().await, 2);

            client
                .settle(&BundleId("0xa".to_string()), BundleStatus::Expired)
                .await;
            client
                .settle(
                    &BundleId("0xb".to_string()),
                    BundleStatus::Included { block_number: 99 },
                )
                .await;
            assert_eq!(client.tracked_bundles().await, 0);

            // A settled bundle is no longer known to the client
            let result = client.get_bundle_status(&BundleId("0xa".to_string())).await;
            assert!(matches!(result, Err(RelayError::UnknownBundle(_))));
        });
    }

    #[test]
    fn test_unknown_bundle_status() {
        let client = client();
        let result = tokio_test::block_on(client.get_bundle_status(&BundleId("0x1".to_string())));
        assert!(matches!(result, Err(RelayError::UnknownBundle(_))));
    }
}
