//! CLI commands for agentpair using clap.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::FailurePolicy;
use crate::config::{load_settings, Settings};
use crate::ledger::wait_for_receipt;
use crate::orchestrator::{build_services, connect_ledger, Orchestrator};
use crate::transfer::TransferService;

const RECEIPT_POLL: Duration = Duration::from_secs(1);
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// agentpair - two message-passing agents sharing an ERC-20 token ledger.
#[derive(Parser, Debug)]
#[command(name = "agentpair")]
#[command(version)]
#[command(about = "Two autonomous agents exchanging messages and ERC-20 tokens", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.agentpair/settings.json when present)
    #[arg(long, global = true, env = "AGENTPAIR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run both agents until Ctrl-C
    Run {
        /// Do not send random messages
        #[arg(long, default_value_t = false)]
        no_generator: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Override the failure policy (stop-activity, stop-agent, stop-process)
        #[arg(long)]
        failure_policy: Option<FailurePolicy>,
    },

    /// Validate settings and ledger connectivity
    Check,

    /// Show token balances of both identities
    Balance,

    /// Send tokens from one identity to the other
    Transfer {
        /// Sending identity
        #[arg(long, value_enum)]
        from: Side,

        /// Amount in token base units
        #[arg(long)]
        amount: u128,

        /// Wait for the receipt
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        let settings = load_settings(self.config.as_deref())?;
        match &self.command {
            Command::Run {
                no_generator,
                duration_secs,
                failure_policy,
            } => cmd_run(&settings, *no_generator, *duration_secs, *failure_policy).await,
            Command::Check => cmd_check(&settings).await,
            Command::Balance => cmd_balance(&settings).await,
            Command::Transfer { from, amount, wait } => {
                cmd_transfer(&settings, *from, *amount, *wait).await
            }
        }
    }
}

async fn cmd_run(
    settings: &Settings,
    no_generator: bool,
    duration_secs: Option<u64>,
    failure_policy: Option<FailurePolicy>,
) -> Result<()> {
    let mut orchestrator = Orchestrator::connect(settings).await?;
    if no_generator {
        orchestrator.set_generator_enabled(false);
    }
    if let Some(policy) = failure_policy {
        orchestrator.set_failure_policy(policy);
    }

    let shutdown = async move {
        let deadline = async {
            match duration_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C"),
            _ = deadline => tracing::info!("Run duration elapsed"),
        }
    };

    orchestrator.run(shutdown).await?;
    Ok(())
}

async fn cmd_check(settings: &Settings) -> Result<()> {
    let ledger = connect_ledger(settings).await?;
    let (source, target) = build_services(settings, ledger)?;
    let decimals = source
        .decimals()
        .await
        .context("Token contract did not answer decimals()")?;

    println!("Ledger:  {}", settings.rpc_url()?);
    println!("Chain:   {}", settings.ledger.chain_id);
    println!("Token:   {} ({} decimals)", settings.token_address()?, decimals);
    println!("Source:  {}", source.identity());
    println!("Target:  {}", target.identity());
    println!("Configuration OK");
    Ok(())
}

async fn cmd_balance(settings: &Settings) -> Result<()> {
    let ledger = connect_ledger(settings).await?;
    let (source, target) = build_services(settings, ledger)?;
    let decimals = source.decimals().await?;

    for (label, service) in [("source", &source), ("target", &target)] {
        let balance = service.fetch_balance().await?;
        println!(
            "{:<7} {}  {} ({})",
            label,
            service.identity(),
            balance,
            format_units(balance, decimals)
        );
    }
    Ok(())
}

async fn cmd_transfer(settings: &Settings, from: Side, amount: u128, wait: bool) -> Result<()> {
    if amount == 0 {
        bail!("Amount must be greater than zero");
    }
    let ledger = connect_ledger(settings).await?;
    let (source, target) = build_services(settings, ledger.clone())?;
    let service: &TransferService = match from {
        Side::Source => &source,
        Side::Target => &target,
    };

    let hash = service.transfer(amount).await?;
    println!("Submitted {} -> {}: {}", service.identity(), service.peer(), hash);

    if wait {
        let receipt = wait_for_receipt(ledger.as_ref(), &hash, RECEIPT_POLL, RECEIPT_TIMEOUT).await?;
        let block = receipt
            .block_number
            .map(|b| b.to_string())
            .unwrap_or_else(|| "?".to_string());
        if !receipt.success {
            bail!("Transfer {} reverted in block {}", hash, block);
        }
        println!("Confirmed in block {}", block);
    }
    Ok(())
}

/// Render base units as a decimal token amount.
fn format_units(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let digits = format!("{:0>width$}", amount, width = decimals as usize + 1);
    let (whole, fraction) = digits.split_at(digits.len() - decimals as usize);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, fraction)
    }
}
