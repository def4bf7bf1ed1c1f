//! Token transfers: build, sign, submit, retry on sequence conflicts.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ledger::{Address, CallRequest, LedgerError, LedgerErrorKind, SharedLedger, TxHash};
use crate::nonce::NonceCounter;
use crate::signer::{LegacyTransaction, Wallet};
use crate::token;

/// How often a transfer is resubmitted after a sequence conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    200
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// One transfer attempt. A fresh request is built for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    pub amount: u128,
    pub nonce: u64,
}

/// Gas estimate plus a 20% safety margin.
pub fn gas_with_margin(estimate: u64) -> u64 {
    estimate.saturating_mul(12) / 10
}

pub struct TransferService {
    ledger: SharedLedger,
    wallet: Wallet,
    nonces: Arc<NonceCounter>,
    token: Address,
    peer: Address,
    chain_id: u64,
    retry: RetryPolicy,
}

impl TransferService {
    pub fn new(
        ledger: SharedLedger,
        wallet: Wallet,
        nonces: Arc<NonceCounter>,
        token: Address,
        peer: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            ledger,
            wallet,
            nonces,
            token,
            peer,
            chain_id,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Address this service signs for.
    pub fn identity(&self) -> Address {
        self.wallet.address()
    }

    /// Address transfers are sent to.
    pub fn peer(&self) -> Address {
        self.peer
    }

    /// Send `amount` base units to the peer and return the submission hash.
    pub async fn transfer(&self, amount: u128) -> Result<TxHash> {
        let identity = self.identity();
        let attempts = self.retry.max_attempts.max(1);
        let mut last_conflict: Option<LedgerError> = None;

        for attempt in 1..=attempts {
            let lease = self.nonces.reserve(&identity).await?;
            let request = TransferRequest {
                from: identity,
                to: self.peer,
                amount,
                nonce: lease.nonce(),
            };

            match self.submit(&request).await {
                Ok(hash) => {
                    lease.commit();
                    tracing::info!(
                        "Transfer of {} from {} to {} submitted (nonce {}): {}",
                        amount,
                        identity,
                        self.peer,
                        request.nonce,
                        hash
                    );
                    return Ok(hash);
                }
                Err(Error::Ledger(e)) if e.is_sequence_conflict() => {
                    drop(lease);
                    tracing::warn!(
                        "Nonce {} for {} rejected (attempt {}/{}): {}",
                        request.nonce,
                        identity,
                        attempt,
                        attempts,
                        e
                    );
                    last_conflict = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(self.retry.backoff_ms)).await;
                    }
                }
                Err(e) => {
                    tracing::error!("Transfer from {} failed: {}", identity, e);
                    return Err(e);
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts,
            last: last_conflict.unwrap_or_else(|| {
                LedgerError::new(LedgerErrorKind::SequenceConflict, "no attempt was made")
            }),
        })
    }

    async fn submit(&self, request: &TransferRequest) -> Result<TxHash> {
        let data = token::encode_transfer(&request.to, request.amount);
        let gas_price = self.ledger.gas_price().await?;

        let call = CallRequest {
            from: Some(request.from),
            to: self.token,
            data: data.clone(),
            nonce: Some(request.nonce),
            gas_price: Some(gas_price),
        };
        let estimate = self.ledger.estimate_gas(&call).await?;

        let tx = LegacyTransaction {
            nonce: request.nonce,
            gas_price,
            gas: gas_with_margin(estimate),
            to: self.token,
            value: 0,
            data,
            chain_id: self.chain_id,
        };
        let raw = self.wallet.sign_transaction(&tx)?;

        tracing::debug!(
            "Submitting transfer nonce={} gas={} gas_price={}",
            tx.nonce,
            tx.gas,
            tx.gas_price
        );
        Ok(self.ledger.send_raw_transaction(&raw).await?)
    }

    /// Token balance of this service's own identity. Never retried.
    pub async fn fetch_balance(&self) -> Result<u128> {
        self.balance_of(&self.identity()).await
    }

    pub async fn balance_of(&self, owner: &Address) -> Result<u128> {
        let output = self
            .ledger
            .call(&CallRequest {
                to: self.token,
                data: token::encode_balance_of(owner),
                ..CallRequest::default()
            })
            .await?;
        token::decode_uint(&output)
    }

    pub async fn decimals(&self) -> Result<u8> {
        let output = self
            .ledger
            .call(&CallRequest {
                to: self.token,
                data: token::encode_decimals(),
                ..CallRequest::default()
            })
            .await?;
        token::decode_decimals(&output)
    }
}
