//! agentpair library root.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod mailbox;
pub mod nonce;
pub mod orchestrator;
pub mod signer;
pub mod token;
pub mod transfer;

pub use agent::{Agent, AgentState, FailurePolicy, MessageHandler};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use error::{Error, Result};
pub use ledger::{LedgerClient, RpcLedger};
pub use orchestrator::Orchestrator;
pub use transfer::{RetryPolicy, TransferService};
