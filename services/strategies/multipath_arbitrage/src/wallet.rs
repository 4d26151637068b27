//! Searcher wallet balances over JSON-RPC
//!
//! ERC-20 balances come from `balanceOf` via `eth_call`; the nonce is the
//! pending transaction count so a bundle built while another is in flight
//! does not reuse it.

use crate::error::{ArbitrageError, Result};
use crate::interfaces::WalletBalances;
use crate::types::Token;
use anyhow::Context;
use async_trait::async_trait;
use ethers::abi::{self, Token as AbiToken};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, TransactionRequest, U256};
use ethers::utils::id;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use torq_amm::pow10;
use url::Url;

pub struct RpcWallet {
    provider: Provider<Http>,
    owner: Address,
}

fn balance_of_calldata(owner: Address) -> Bytes {
    let mut data = id("balanceOf(address)").to_vec();
    data.extend(abi::encode(&[AbiToken::Address(owner)]));
    Bytes::from(data)
}

/// Raw integer units to whole tokens
pub fn whole_tokens(raw: U256, decimals: u8) -> Result<Decimal> {
    let raw = Decimal::from_str(&raw.to_string())
        .map_err(|e| ArbitrageError::Amm(format!("balance {} out of range: {}", raw, e)))?;
    Ok(raw / pow10(decimals))
}

impl RpcWallet {
    pub fn new(rpc_url: &str, owner: Address, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client for wallet")?;
        let url: Url = rpc_url.parse().context("Invalid RPC URL")?;
        Ok(Self {
            provider: Provider::new(Http::new_with_client(url, client)),
            owner,
        })
    }

    pub fn owner(&self) -> Address {
        self.owner
    }
}

#[async_trait]
impl WalletBalances for RpcWallet {
    async fn balance_of(&self, token: &Token) -> Result<Decimal> {
        let contract = Address::from_str(&token.address).map_err(|e| {
            ArbitrageError::Configuration(format!("Invalid token address {}: {}", token.address, e))
        })?;
        let call: TypedTransaction = TransactionRequest::new()
            .to(contract)
            .data(balance_of_calldata(self.owner))
            .into();
        let output = self
            .provider
            .call(&call, None)
            .await
            .map_err(|e| ArbitrageError::connectivity("wallet", e))?;
        if output.len() < 32 {
            return Ok(Decimal::ZERO);
        }
        whole_tokens(U256::from_big_endian(&output[..32]), token.decimals)
    }

    async fn next_nonce(&self) -> Result<u64> {
        self.provider
            .get_transaction_count(self.owner, Some(BlockNumber::Pending.into()))
            .await
            .map(|nonce| nonce.as_u64())
            .map_err(|e| ArbitrageError::connectivity("wallet", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_of_calldata() {
        let owner = Address::from_low_u64_be(0xabc);
        let data = balance_of_calldata(owner);
        assert_eq!(&data[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(data.len(), 36);
        assert_eq!(&data[34..], &[0x0a, 0xbc]);
    }

    #[test]
    fn test_whole_tokens() {
        assert_eq!(whole_tokens(U256::from(2_500_000u64), 6).unwrap(), dec!(2.5));
        assert_eq!(
            whole_tokens(U256::from(1_000_000_000_000_000_000u128), 18).unwrap(),
            dec!(1)
        );
    }
}
