//! Ledger service seam.
//!
//! Agents never talk to a node directly; everything goes through
//! [`LedgerClient`], which has a JSON-RPC implementation ([`RpcLedger`]) and a
//! scripted in-memory double for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod rpc;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use rpc::RpcLedger;
pub use types::{Address, CallRequest, Receipt, TxHash};

/// Failure category of a ledger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerErrorKind {
    /// The submitted nonce was already used or is below the account's next value.
    SequenceConflict,
    /// Could not reach the node or the HTTP exchange failed.
    Transport,
    /// The node answered with a JSON-RPC error.
    Rpc,
    /// The contract call reverted.
    Reverted,
    /// The node answered with something we could not parse.
    Decode,
}

impl std::fmt::Display for LedgerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerErrorKind::SequenceConflict => write!(f, "sequence_conflict"),
            LedgerErrorKind::Transport => write!(f, "transport"),
            LedgerErrorKind::Rpc => write!(f, "rpc"),
            LedgerErrorKind::Reverted => write!(f, "reverted"),
            LedgerErrorKind::Decode => write!(f, "decode"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub message: String,
}

impl LedgerError {
    pub fn new(kind: LedgerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_sequence_conflict(&self) -> bool {
        self.kind == LedgerErrorKind::SequenceConflict
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for LedgerError {}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            LedgerError::new(LedgerErrorKind::Decode, e.to_string())
        } else {
            LedgerError::new(LedgerErrorKind::Transport, e.to_string())
        }
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Map a node's error text onto a [`LedgerErrorKind`].
///
/// This is the only place error strings are inspected.
pub fn classify_rpc_error(message: &str) -> LedgerError {
    let m = message.to_lowercase();
    let kind = if m.contains("nonce too low")
        || m.contains("already known")
        || m.contains("replacement transaction underpriced")
        || m.contains("nonce has already been used")
    {
        LedgerErrorKind::SequenceConflict
    } else if m.contains("execution reverted") || m.contains("revert") {
        LedgerErrorKind::Reverted
    } else {
        LedgerErrorKind::Rpc
    };

    LedgerError::new(kind, message)
}

/// Operations the agents need from a ledger node.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Chain identifier reported by the node.
    async fn chain_id(&self) -> LedgerResult<u64>;

    /// Number of transactions sent from `address` (the next usable nonce).
    async fn transaction_count(&self, address: &Address) -> LedgerResult<u64>;

    async fn gas_price(&self) -> LedgerResult<u128>;

    async fn estimate_gas(&self, request: &CallRequest) -> LedgerResult<u64>;

    /// Read-only contract call; returns the raw ABI-encoded output.
    async fn call(&self, request: &CallRequest) -> LedgerResult<Vec<u8>>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> LedgerResult<TxHash>;

    async fn transaction_receipt(&self, hash: &TxHash) -> LedgerResult<Option<Receipt>>;
}

pub type SharedLedger = Arc<dyn LedgerClient>;

/// Poll for a receipt until it appears or `timeout` passes.
pub async fn wait_for_receipt(
    ledger: &dyn LedgerClient,
    hash: &TxHash,
    poll: Duration,
    timeout: Duration,
) -> LedgerResult<Receipt> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(receipt) = ledger.transaction_receipt(hash).await? {
            return Ok(receipt);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(LedgerError::new(
                LedgerErrorKind::Transport,
                format!("no receipt for {} within {}s", hash, timeout.as_secs()),
            ));
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sequence_conflicts() {
        for text in [
            "nonce too low",
            "Nonce too low: next nonce 5, tx nonce 4",
            "already known",
            "replacement transaction underpriced",
        ] {
            assert_eq!(
                classify_rpc_error(text).kind,
                LedgerErrorKind::SequenceConflict,
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_classify_other_errors() {
        assert_eq!(
            classify_rpc_error("execution reverted: ERC20: transfer amount exceeds balance").kind,
            LedgerErrorKind::Reverted
        );
        assert_eq!(
            classify_rpc_error("insufficient funds for gas * price + value").kind,
            LedgerErrorKind::Rpc
        );
    }

    #[tokio::test]
    async fn test_wait_for_receipt_polls_until_present() {
        let ledger = mock::MockLedger::new();
        let hash = TxHash([7u8; 32]);
        ledger.set_receipt_after(hash, 2);

        let receipt = wait_for_receipt(
            &ledger,
            &hash,
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(receipt.transaction_hash, hash);
        assert!(receipt.success);
    }
}
