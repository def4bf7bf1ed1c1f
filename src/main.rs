//! agentpair - two autonomous agents trading messages and ERC-20 tokens.

use clap::Parser;
use std::process::ExitCode;

use agentpair::{logging, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Held until exit so the file appender flushes.
    let _guard = match logging::init() {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let args = Commands::parse();

    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
