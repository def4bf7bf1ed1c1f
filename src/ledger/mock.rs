//! Scripted in-memory ledger used by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha3::{Digest, Keccak256};

use super::types::{Address, CallRequest, Receipt, TxHash};
use super::{LedgerClient, LedgerError, LedgerErrorKind, LedgerResult};
use crate::token;

#[derive(Debug)]
struct MockState {
    chain_id: u64,
    tx_counts: HashMap<Address, u64>,
    gas_price: u128,
    gas_estimate: u64,
    balances: HashMap<Address, u128>,
    decimals: u8,
    conflicts_remaining: u32,
    send_failure: Option<LedgerError>,
    call_failure: Option<LedgerError>,
    sent: Vec<Vec<u8>>,
    estimates: Vec<CallRequest>,
    calls: Vec<CallRequest>,
    count_reads: usize,
    count_delay: Duration,
    receipts: HashMap<TxHash, u32>,
}

pub struct MockLedger {
    state: Mutex<MockState>,
    reads_in_flight: AtomicUsize,
    max_reads_in_flight: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                chain_id: 123456,
                tx_counts: HashMap::new(),
                gas_price: 1_000_000_000,
                gas_estimate: 50_000,
                balances: HashMap::new(),
                decimals: 18,
                conflicts_remaining: 0,
                send_failure: None,
                call_failure: None,
                sent: Vec::new(),
                estimates: Vec::new(),
                calls: Vec::new(),
                count_reads: 0,
                count_delay: Duration::ZERO,
                receipts: HashMap::new(),
            }),
            reads_in_flight: AtomicUsize::new(0),
            max_reads_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.with_state(|s| s.chain_id = chain_id);
    }

    pub fn set_transaction_count(&self, address: Address, count: u64) {
        self.with_state(|s| {
            s.tx_counts.insert(address, count);
        });
    }

    pub fn set_balance(&self, address: Address, balance: u128) {
        self.with_state(|s| {
            s.balances.insert(address, balance);
        });
    }

    pub fn set_gas(&self, gas_price: u128, gas_estimate: u64) {
        self.with_state(|s| {
            s.gas_price = gas_price;
            s.gas_estimate = gas_estimate;
        });
    }

    /// Reject the next `k` submissions with "nonce too low".
    pub fn script_sequence_conflicts(&self, k: u32) {
        self.with_state(|s| s.conflicts_remaining = k);
    }

    pub fn fail_sends_with(&self, error: LedgerError) {
        self.with_state(|s| s.send_failure = Some(error));
    }

    pub fn fail_calls_with(&self, error: LedgerError) {
        self.with_state(|s| s.call_failure = Some(error));
    }

    /// Make every `transaction_count` read take `delay`, so overlapping readers show up.
    pub fn set_count_delay(&self, delay: Duration) {
        self.with_state(|s| s.count_delay = delay);
    }

    /// The receipt for `hash` appears after `polls` empty answers.
    pub fn set_receipt_after(&self, hash: TxHash, polls: u32) {
        self.with_state(|s| {
            s.receipts.insert(hash, polls);
        });
    }

    /// Every raw transaction submitted, including rejected ones.
    pub fn sent_transactions(&self) -> Vec<Vec<u8>> {
        self.with_state(|s| s.sent.clone())
    }

    pub fn estimate_requests(&self) -> Vec<CallRequest> {
        self.with_state(|s| s.estimates.clone())
    }

    pub fn call_requests(&self) -> Vec<CallRequest> {
        self.with_state(|s| s.calls.clone())
    }

    /// Amounts of every transfer the ledger was asked to estimate.
    pub fn transfer_amounts(&self) -> Vec<u128> {
        self.estimate_requests()
            .iter()
            .filter_map(|r| token::decode_transfer(&r.data).ok())
            .map(|(_, amount)| amount)
            .collect()
    }

    pub fn count_reads(&self) -> usize {
        self.with_state(|s| s.count_reads)
    }

    pub fn max_concurrent_count_reads(&self) -> usize {
        self.max_reads_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn word(value: u128) -> Vec<u8> {
    let mut out = vec![0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn chain_id(&self) -> LedgerResult<u64> {
        Ok(self.with_state(|s| s.chain_id))
    }

    async fn transaction_count(&self, address: &Address) -> LedgerResult<u64> {
        let now = self.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_reads_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.with_state(|s| {
            s.count_reads += 1;
            s.count_delay
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let count = self.with_state(|s| s.tx_counts.get(address).copied().unwrap_or(0));
        self.reads_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(count)
    }

    async fn gas_price(&self) -> LedgerResult<u128> {
        Ok(self.with_state(|s| s.gas_price))
    }

    async fn estimate_gas(&self, request: &CallRequest) -> LedgerResult<u64> {
        Ok(self.with_state(|s| {
            s.estimates.push(request.clone());
            s.gas_estimate
        }))
    }

    async fn call(&self, request: &CallRequest) -> LedgerResult<Vec<u8>> {
        self.with_state(|s| {
            s.calls.push(request.clone());
            if let Some(err) = s.call_failure.clone() {
                return Err(err);
            }
            let data = &request.data;
            if data.len() >= 4 && data[..4] == token::BALANCE_OF_SELECTOR {
                let mut owner = [0u8; 20];
                owner.copy_from_slice(&data[16..36]);
                let balance = s.balances.get(&Address(owner)).copied().unwrap_or(0);
                Ok(word(balance))
            } else if data.len() >= 4 && data[..4] == token::DECIMALS_SELECTOR {
                Ok(word(s.decimals as u128))
            } else {
                Err(LedgerError::new(LedgerErrorKind::Reverted, "execution reverted"))
            }
        })
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> LedgerResult<TxHash> {
        self.with_state(|s| {
            s.sent.push(raw.to_vec());
            if s.conflicts_remaining > 0 {
                s.conflicts_remaining -= 1;
                return Err(LedgerError::new(LedgerErrorKind::SequenceConflict, "nonce too low"));
            }
            if let Some(err) = s.send_failure.clone() {
                return Err(err);
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&Keccak256::digest(raw));
            Ok(TxHash(hash))
        })
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<Receipt>> {
        Ok(self.with_state(|s| match s.receipts.get_mut(hash) {
            Some(0) => Some(Receipt {
                transaction_hash: *hash,
                block_number: Some(1),
                success: true,
                contract_address: None,
            }),
            Some(remaining) => {
                *remaining -= 1;
                None
            }
            None => None,
        }))
    }
}
