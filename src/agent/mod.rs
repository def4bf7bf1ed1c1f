//! Autonomous agents.
//!
//! An [`Agent`] owns one end of each mailbox (its inbox, and an outbox bound
//! to the peer's inbox), a [`HandlerRouter`], and a transfer service. Its
//! lifecycle is one-way: `Created -> Running -> Stopped`.

use std::sync::{Arc, RwLock};

use rand::Rng;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::mailbox::{Inbox, Outbox};
use crate::transfer::TransferService;

pub mod activity;
pub mod router;

pub use activity::{
    default_vocabulary, random_message, run_balance_poller, run_generator, run_message_loop,
    ActivityKind, FailurePolicy, Intervals,
};
pub use router::{
    handler_fn, HandlerRouter, LogHandler, MessageHandler, SharedHandler, TransferHandler,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Created,
    Running,
    Stopped,
}

pub struct Agent {
    name: String,
    inbox: Inbox,
    outbox: Outbox,
    router: RwLock<HandlerRouter>,
    transfers: Arc<TransferService>,
    intervals: Intervals,
    state: watch::Sender<AgentState>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        inbox: Inbox,
        outbox: Outbox,
        transfers: Arc<TransferService>,
    ) -> Self {
        let (state, _) = watch::channel(AgentState::Created);
        Self {
            name: name.into(),
            inbox,
            outbox,
            router: RwLock::new(HandlerRouter::new()),
            transfers,
            intervals: Intervals::default(),
            state,
        }
    }

    pub fn with_intervals(mut self, intervals: Intervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn transfers(&self) -> &Arc<TransferService> {
        &self.transfers
    }

    pub fn intervals(&self) -> Intervals {
        self.intervals
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == AgentState::Running
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Register `handler` for messages containing `predicate`.
    ///
    /// A predicate maps to exactly one handler; re-registering replaces it.
    pub fn register(&self, predicate: impl Into<String>, handler: SharedHandler) {
        let predicate = predicate.into();
        let mut router = self.router.write().unwrap_or_else(|p| p.into_inner());
        if router.register(predicate.clone(), handler).is_some() {
            tracing::debug!("[{}] Replaced handler for '{}'", self.name, predicate);
        }
    }

    /// Move from `Created` to `Running`.
    ///
    /// This only flips the state. The periodic activities (message loop,
    /// generator, balance poller) are spawned by the orchestrator, or by
    /// the caller through [`run_message_loop`] and friends, and run while
    /// the agent stays `Running`.
    pub fn start(&self) -> Result<()> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == AgentState::Created {
                *state = AgentState::Running;
                started = true;
            }
            started
        });

        if !started {
            return Err(Error::Agent(format!(
                "[{}] cannot start from state {:?}",
                self.name,
                self.state()
            )));
        }
        tracing::info!("[{}] Agent started.", self.name);
        Ok(())
    }

    /// Move to `Stopped`. Running activities exit at their next check.
    pub fn stop(&self) {
        let previous = self.state.send_replace(AgentState::Stopped);
        if previous != AgentState::Stopped {
            tracing::info!("[{}] Agent stopping.", self.name);
        }
    }

    /// Drain the inbox and run every matching handler for every message.
    ///
    /// Returns the number of handler invocations. All matching handlers run
    /// even if one fails; the first failure is returned after the batch.
    pub async fn process_messages(&self) -> Result<usize> {
        let messages = self.inbox.drain();
        if messages.is_empty() {
            return Ok(0);
        }

        let router = self
            .router
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let mut invoked = 0;
        let mut first_error: Option<Error> = None;

        for message in &messages {
            let routes = router.route(message);
            if routes.is_empty() {
                tracing::debug!("[{}] No handler for message: {}", self.name, message);
                continue;
            }
            for (predicate, handler) in routes {
                tracing::debug!(
                    "[{}] Handling message with {}: {}",
                    self.name,
                    predicate,
                    message
                );
                invoked += 1;
                if let Err(e) = handler.handle(message).await {
                    tracing::error!(
                        "[{}] Handler '{}' failed on '{}': {}",
                        self.name,
                        predicate,
                        message,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(invoked),
        }
    }

    /// Send one random two-word message through the outbox.
    pub fn send_random_message<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        vocabulary: &[String],
    ) -> Option<String> {
        let message = random_message(rng, vocabulary)?;
        self.outbox.send(message.clone());
        tracing::info!("[{}] Sent random message: {}", self.name, message);
        Some(message)
    }

    /// Fetch and report the agent's token balance.
    pub async fn poll_balance(&self) -> Result<u128> {
        let balance = self.transfers.fetch_balance().await?;
        tracing::info!("[{}] Current ERC20 balance: {}", self.name, balance);
        Ok(balance)
    }
}
