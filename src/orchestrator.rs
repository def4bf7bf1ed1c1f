//! Wiring and supervision for the agent pair.
//!
//! The orchestrator cross-wires two agents through their mailboxes, gives
//! each a transfer service signing for its own identity, starts the
//! periodic activities, and applies the configured [`FailurePolicy`] when
//! one of them fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::agent::{
    run_balance_poller, run_generator, run_message_loop, ActivityKind, Agent, FailurePolicy,
    LogHandler, SharedHandler, TransferHandler,
};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::ledger::{LedgerClient, RpcLedger, SharedLedger};
use crate::mailbox;
use crate::nonce::NonceCounter;
use crate::transfer::TransferService;

pub const HELLO_PREDICATE: &str = "hello";
pub const CRYPTO_PREDICATE: &str = "crypto";

type ActivityOutcome = (String, ActivityKind, Result<()>);

/// Ask the node for its chain id. An unreachable node is a configuration error.
pub async fn check_connectivity(ledger: &dyn LedgerClient, expected_chain_id: u64) -> Result<u64> {
    let chain_id = ledger
        .chain_id()
        .await
        .map_err(|e| Error::Config(format!("Cannot reach ledger node: {}", e)))?;

    if chain_id != expected_chain_id {
        tracing::warn!(
            "Node reports chain id {} but {} is configured; signatures use the configured id",
            chain_id,
            expected_chain_id
        );
    } else {
        tracing::info!("Connected to ledger, chain id {}", chain_id);
    }
    Ok(chain_id)
}

/// Transfer services for (source, target), sharing one nonce counter.
pub fn build_services(
    settings: &Settings,
    ledger: SharedLedger,
) -> Result<(Arc<TransferService>, Arc<TransferService>)> {
    let (source, target) = settings.wallets()?;
    let token = settings.token_address()?;
    let chain_id = settings.ledger.chain_id;
    let nonces = Arc::new(NonceCounter::new(ledger.clone()));

    let source_address = source.address();
    let target_address = target.address();

    let source_service = TransferService::new(
        ledger.clone(),
        source,
        nonces.clone(),
        token,
        target_address,
        chain_id,
    )
    .with_retry_policy(settings.transfers);
    let target_service =
        TransferService::new(ledger, target, nonces, token, source_address, chain_id)
            .with_retry_policy(settings.transfers);

    Ok((Arc::new(source_service), Arc::new(target_service)))
}

pub struct Orchestrator {
    first: Arc<Agent>,
    second: Arc<Agent>,
    vocabulary: Arc<Vec<String>>,
    generator_enabled: bool,
    failure_policy: FailurePolicy,
    shutdown_grace: Duration,
}

impl Orchestrator {
    /// Build both agents against an already connected ledger.
    pub fn build(settings: &Settings, ledger: SharedLedger) -> Result<Self> {
        let (source_service, target_service) = build_services(settings, ledger)?;
        let agents = &settings.agents;

        let (to_first, first_inbox) = mailbox::channel();
        let (to_second, second_inbox) = mailbox::channel();

        let first = Agent::new(&agents.first_name, first_inbox, to_second, source_service)
            .with_intervals(agents.intervals);
        let second = Agent::new(
            &agents.second_name,
            second_inbox,
            to_first,
            target_service.clone(),
        )
        .with_intervals(agents.intervals);

        first.register(
            HELLO_PREDICATE,
            Arc::new(LogHandler::new(first.name(), HELLO_PREDICATE)),
        );

        let crypto_handler: SharedHandler = if agents.crypto_transfer_amount > 0 {
            Arc::new(TransferHandler::new(
                second.name(),
                CRYPTO_PREDICATE,
                target_service,
                u128::from(agents.crypto_transfer_amount),
            ))
        } else {
            Arc::new(LogHandler::new(second.name(), CRYPTO_PREDICATE))
        };
        second.register(CRYPTO_PREDICATE, crypto_handler);

        Ok(Self {
            first: Arc::new(first),
            second: Arc::new(second),
            vocabulary: Arc::new(agents.vocabulary.clone()),
            generator_enabled: agents.generator_enabled,
            failure_policy: settings.supervision.failure_policy,
            shutdown_grace: Duration::from_secs(settings.supervision.shutdown_grace_secs),
        })
    }

    /// Connect to the configured node, check it answers, then build.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let ledger = connect_ledger(settings).await?;
        Self::build(settings, ledger)
    }

    pub fn first(&self) -> &Arc<Agent> {
        &self.first
    }

    pub fn second(&self) -> &Arc<Agent> {
        &self.second
    }

    pub fn agents(&self) -> [&Arc<Agent>; 2] {
        [&self.first, &self.second]
    }

    pub fn set_generator_enabled(&mut self, enabled: bool) {
        self.generator_enabled = enabled;
    }

    pub fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.failure_policy = policy;
    }

    fn agent_named(&self, name: &str) -> Option<&Arc<Agent>> {
        self.agents().into_iter().find(|a| a.name() == name)
    }

    /// Stop both agents. Activities exit at their next state check.
    pub fn stop(&self) {
        for agent in self.agents() {
            agent.stop();
        }
    }

    /// Start both agents and supervise their activities until `shutdown`
    /// resolves, every activity has ended, or a failure under
    /// [`FailurePolicy::StopProcess`] occurs (whose error is returned).
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        for agent in self.agents() {
            if let Err(e) = agent.start() {
                self.stop();
                return Err(e);
            }
        }

        let mut tasks: JoinSet<ActivityOutcome> = JoinSet::new();
        for agent in self.agents() {
            spawn_activity(
                &mut tasks,
                agent.name(),
                ActivityKind::MessageLoop,
                run_message_loop(agent.clone(), self.failure_policy),
            );
            spawn_activity(
                &mut tasks,
                agent.name(),
                ActivityKind::BalancePoller,
                run_balance_poller(agent.clone()),
            );
            if self.generator_enabled {
                spawn_activity(
                    &mut tasks,
                    agent.name(),
                    ActivityKind::Generator,
                    run_generator(agent.clone(), self.vocabulary.clone()),
                );
            }
        }
        tracing::info!(
            "Supervising {} activities (failure policy {:?})",
            tasks.len(),
            self.failure_policy
        );

        tokio::pin!(shutdown);
        let mut failure: Option<Error> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                joined = tasks.join_next() => {
                    match joined {
                        None => {
                            tracing::info!("All activities have ended");
                            break;
                        }
                        Some(Ok((agent, kind, Ok(())))) => {
                            tracing::debug!("[{}] {} finished", agent, kind);
                        }
                        Some(Ok((agent, kind, Err(e)))) => {
                            tracing::error!("[{}] {} failed: {}", agent, kind, e);
                            match self.failure_policy {
                                FailurePolicy::StopActivity => {}
                                FailurePolicy::StopAgent => {
                                    if let Some(owner) = self.agent_named(&agent) {
                                        owner.stop();
                                    }
                                }
                                FailurePolicy::StopProcess => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        Some(Err(join_error)) => {
                            tracing::error!("Activity task aborted: {}", join_error);
                            if self.failure_policy != FailurePolicy::StopActivity {
                                failure = Some(Error::Agent(format!(
                                    "activity task aborted: {}",
                                    join_error
                                )));
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.stop();
        self.drain(&mut tasks).await;

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait up to the shutdown grace for activities to exit, then detach the rest.
    async fn drain(&self, tasks: &mut JoinSet<ActivityOutcome>) {
        let waited = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok((agent, kind, Err(e))) = joined {
                    tracing::warn!("[{}] {} failed during shutdown: {}", agent, kind, e);
                }
            }
        })
        .await;

        if waited.is_err() {
            tracing::warn!(
                "{} activities still busy after {}s; detaching",
                tasks.len(),
                self.shutdown_grace.as_secs()
            );
            tasks.detach_all();
        } else {
            tracing::info!("All agents stopped");
        }

        for agent in self.agents() {
            let stats = agent.inbox().stats();
            tracing::info!(
                "[{}] Inbox: {} received, {} handled, {} left unread",
                agent.name(),
                stats.total_received,
                stats.total_drained,
                stats.queued
            );
        }
    }
}

/// Open the configured RPC endpoint and verify it responds.
pub async fn connect_ledger(settings: &Settings) -> Result<SharedLedger> {
    let ledger = RpcLedger::new(settings.rpc_url()?);
    tracing::info!("Connecting to ledger at {}", ledger.url());
    check_connectivity(&ledger, settings.ledger.chain_id).await?;
    Ok(Arc::new(ledger))
}

fn spawn_activity<Fut>(
    tasks: &mut JoinSet<ActivityOutcome>,
    agent: &str,
    kind: ActivityKind,
    activity: Fut,
) where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let agent = agent.to_string();
    tasks.spawn(async move { (agent, kind, activity.await) });
}
