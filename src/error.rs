//! Error types for agentpair.

use thiserror::Error;

use crate::ledger::LedgerError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Transfer gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: LedgerError },

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("{0}")]
    Other(String),
}
