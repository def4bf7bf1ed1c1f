//! Per-identity nonce issuance.
//!
//! The ledger is the authority on an account's next nonce. Each identity gets
//! one async mutex; a [`NonceLease`] holds it from the ledger read until the
//! submission using that nonce is accepted ([`NonceLease::commit`]) or
//! abandoned (drop). Two submissions from one identity can therefore never
//! be built from the same read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::ledger::{Address, LedgerResult, SharedLedger};

#[derive(Debug, Default)]
struct NonceSlot {
    /// Highest nonce whose submission the ledger accepted.
    last_committed: Option<u64>,
}

pub struct NonceCounter {
    ledger: SharedLedger,
    slots: Mutex<HashMap<Address, Arc<AsyncMutex<NonceSlot>>>>,
}

impl NonceCounter {
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, identity: &Address) -> Arc<AsyncMutex<NonceSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots.entry(*identity).or_default().clone()
    }

    /// Read the next nonce for `identity` without reserving it.
    pub async fn next(&self, identity: &Address) -> LedgerResult<u64> {
        let lease = self.reserve(identity).await?;
        Ok(lease.nonce())
    }

    /// Reserve the next nonce; the identity stays locked until the lease is committed or dropped.
    pub async fn reserve(&self, identity: &Address) -> LedgerResult<NonceLease> {
        let guard = self.slot(identity).lock_owned().await;
        let count = self.ledger.transaction_count(identity).await?;

        // Never go backwards: the node may not have indexed our last submission yet.
        let nonce = match guard.last_committed {
            Some(last) if last >= count => {
                tracing::debug!(
                    "Ledger count {} for {} trails last committed nonce {}",
                    count,
                    identity,
                    last
                );
                last + 1
            }
            _ => count,
        };

        Ok(NonceLease {
            identity: *identity,
            nonce,
            guard,
        })
    }

    /// Last nonce committed for `identity`, if any.
    pub async fn last_committed(&self, identity: &Address) -> Option<u64> {
        self.slot(identity).lock().await.last_committed
    }
}

/// Exclusive hold on an identity's next nonce.
#[must_use = "dropping a lease releases the nonce without recording it"]
pub struct NonceLease {
    identity: Address,
    nonce: u64,
    guard: OwnedMutexGuard<NonceSlot>,
}

impl NonceLease {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Record the nonce as consumed and release the identity.
    pub fn commit(mut self) {
        self.guard.last_committed = Some(self.nonce);
        tracing::debug!("Committed nonce {} for {}", self.nonce, self.identity);
    }
}
