//! Periodic agent activities: message loop, random chatter, balance polling.
//!
//! Each activity is an independent loop gated by the agent's state. Stopping
//! the agent wakes every sleeping loop, so shutdown does not wait out a full
//! period; an activity busy in a ledger call finishes that call first.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::{Agent, AgentState};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    MessageLoop,
    Generator,
    BalancePoller,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::MessageLoop => write!(f, "message_loop"),
            ActivityKind::Generator => write!(f, "generator"),
            ActivityKind::BalancePoller => write!(f, "balance_poller"),
        }
    }
}

/// What a failing activity takes down with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Only the failing activity ends.
    #[default]
    StopActivity,
    /// The owning agent is stopped.
    StopAgent,
    /// Both agents are stopped and the run returns the error.
    StopProcess,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "stop-activity" | "activity" => Ok(FailurePolicy::StopActivity),
            "stop-agent" | "agent" => Ok(FailurePolicy::StopAgent),
            "stop-process" | "process" => Ok(FailurePolicy::StopProcess),
            other => Err(Error::Config(format!("Unknown failure policy: {}", other))),
        }
    }
}

/// Loop periods in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intervals {
    #[serde(default = "default_message_loop_ms")]
    pub message_loop_ms: u64,
    #[serde(default = "default_generator_ms")]
    pub generator_ms: u64,
    #[serde(default = "default_balance_ms")]
    pub balance_ms: u64,
}

fn default_message_loop_ms() -> u64 {
    1_000
}

fn default_generator_ms() -> u64 {
    2_000
}

fn default_balance_ms() -> u64 {
    10_000
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            message_loop_ms: default_message_loop_ms(),
            generator_ms: default_generator_ms(),
            balance_ms: default_balance_ms(),
        }
    }
}

pub const DEFAULT_VOCABULARY: [&str; 10] = [
    "hello", "sun", "world", "space", "moon", "crypto", "sky", "ocean", "universe", "human",
];

pub fn default_vocabulary() -> Vec<String> {
    DEFAULT_VOCABULARY.iter().map(|w| w.to_string()).collect()
}

/// Two words drawn independently (with replacement), space-joined.
pub fn random_message<R: Rng + ?Sized>(rng: &mut R, vocabulary: &[String]) -> Option<String> {
    let first = vocabulary.choose(rng)?;
    let second = vocabulary.choose(rng)?;
    Some(format!("{} {}", first, second))
}

/// Sleep for `period`, returning early with `false` once the agent leaves `Running`.
async fn sleep_while_running(state: &mut watch::Receiver<AgentState>, period: Duration) -> bool {
    let sleep = tokio::time::sleep(period);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() != AgentState::Running {
                    return false;
                }
            }
        }
    }
}

async fn run_periodic<F, Fut>(
    agent: &Agent,
    kind: ActivityKind,
    period: Duration,
    mut tick: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut state = agent.subscribe();
    tracing::debug!("[{}] {} started", agent.name(), kind);
    while agent.is_running() {
        tick().await?;
        if !sleep_while_running(&mut state, period).await {
            break;
        }
    }
    tracing::debug!("[{}] {} exited", agent.name(), kind);
    Ok(())
}

/// Drain and dispatch the inbox every message-loop period.
///
/// Under [`FailurePolicy::StopActivity`] a handler failure is contained to
/// its drain cycle and the loop keeps draining. Under the other policies
/// the failure ends the loop and is handed to the supervisor.
pub async fn run_message_loop(agent: Arc<Agent>, policy: FailurePolicy) -> Result<()> {
    let period = Duration::from_millis(agent.intervals().message_loop_ms);
    let agent_ref: &Agent = &agent;
    run_periodic(agent_ref, ActivityKind::MessageLoop, period, move || async move {
        match agent_ref.process_messages().await {
            Ok(_) => Ok(()),
            Err(e) if policy == FailurePolicy::StopActivity => {
                tracing::warn!(
                    "[{}] Drain cycle had a failed handler, continuing: {}",
                    agent_ref.name(),
                    e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    })
    .await
}

/// Send a random two-word message to the peer every generator period.
pub async fn run_generator(agent: Arc<Agent>, vocabulary: Arc<Vec<String>>) -> Result<()> {
    let period = Duration::from_millis(agent.intervals().generator_ms);
    let mut rng = StdRng::from_entropy();
    run_periodic(&agent, ActivityKind::Generator, period, || {
        agent.send_random_message(&mut rng, &vocabulary);
        async { Ok(()) }
    })
    .await
}

/// Report the agent's token balance every poll period.
pub async fn run_balance_poller(agent: Arc<Agent>) -> Result<()> {
    let period = Duration::from_millis(agent.intervals().balance_ms);
    let agent_ref: &Agent = &agent;
    run_periodic(agent_ref, ActivityKind::BalancePoller, period, move || async move {
        agent_ref.poll_balance().await.map(|_| ())
    })
    .await
}
