//! Message routing by substring predicate.
//!
//! Routes are kept in registration order. Every route whose predicate occurs
//! in a message fires; there is no first-match-wins. Registering an existing
//! predicate replaces its handler in place.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::transfer::TransferService;

/// Reaction to a routed message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &str) -> Result<()>;
}

pub type SharedHandler = Arc<dyn MessageHandler>;

/// Does `predicate` select `message`?
pub fn matches(predicate: &str, message: &str) -> bool {
    message.contains(predicate)
}

#[derive(Clone, Default)]
pub struct HandlerRouter {
    routes: Vec<(String, SharedHandler)>,
}

impl HandlerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `predicate`, returning the handler it replaced.
    pub fn register(
        &mut self,
        predicate: impl Into<String>,
        handler: SharedHandler,
    ) -> Option<SharedHandler> {
        let predicate = predicate.into();
        if let Some(slot) = self.routes.iter_mut().find(|(p, _)| *p == predicate) {
            return Some(std::mem::replace(&mut slot.1, handler));
        }
        self.routes.push((predicate, handler));
        None
    }

    /// All routes selecting `message`, in registration order.
    pub fn route(&self, message: &str) -> Vec<(String, SharedHandler)> {
        self.routes
            .iter()
            .filter(|(predicate, _)| matches(predicate, message))
            .map(|(predicate, handler)| (predicate.clone(), handler.clone()))
            .collect()
    }

    pub fn predicates(&self) -> Vec<&str> {
        self.routes.iter().map(|(p, _)| p.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Logs receipt of a message.
pub struct LogHandler {
    agent: String,
    topic: String,
}

impl LogHandler {
    pub fn new(agent: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, message: &str) -> Result<()> {
        tracing::info!("[{}] Received {} message: {}", self.agent, self.topic, message);
        Ok(())
    }
}

/// Logs receipt and sends a fixed token amount to the peer.
pub struct TransferHandler {
    agent: String,
    topic: String,
    service: Arc<TransferService>,
    amount: u128,
}

impl TransferHandler {
    pub fn new(
        agent: impl Into<String>,
        topic: impl Into<String>,
        service: Arc<TransferService>,
        amount: u128,
    ) -> Self {
        Self {
            agent: agent.into(),
            topic: topic.into(),
            service,
            amount,
        }
    }
}

#[async_trait]
impl MessageHandler for TransferHandler {
    async fn handle(&self, message: &str) -> Result<()> {
        tracing::info!(
            "[{}] Received {} message: {} (sending {} to {})",
            self.agent,
            self.topic,
            message,
            self.amount,
            self.service.peer()
        );
        let hash = self.service.transfer(self.amount).await?;
        tracing::info!("[{}] Transfer submitted: {}", self.agent, hash);
        Ok(())
    }
}

/// Adapts a plain closure into a handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    async fn handle(&self, message: &str) -> Result<()> {
        (self.0)(message)
    }
}

pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: Fn(&str) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, SharedHandler) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handler = handler_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (hits, handler)
    }

    #[test]
    fn test_matches_is_substring() {
        assert!(matches("crypto", "crypto moon"));
        assert!(matches("crypto", "moon crypto"));
        assert!(matches("hello", "hellohello"));
        assert!(!matches("crypto", "Crypto moon"));
        assert!(matches("", "anything"));
    }

    #[test]
    fn test_route_fans_out_in_order() {
        let mut router = HandlerRouter::new();
        let (_, a) = counting();
        let (_, b) = counting();
        let (_, c) = counting();
        router.register("moon", a);
        router.register("sky", b);
        router.register("crypto", c);

        let routed: Vec<String> = router.route("crypto moon").into_iter().map(|(p, _)| p).collect();
        assert_eq!(routed, vec!["moon", "crypto"]);
        assert!(router.route("ocean human").is_empty());
    }

    #[tokio::test]
    async fn test_register_replaces_in_place() {
        let mut router = HandlerRouter::new();
        let (first_hits, first) = counting();
        let (second_hits, second) = counting();
        let (_, other) = counting();

        assert!(router.register("hello", first).is_none());
        router.register("world", other);
        assert!(router.register("hello", second).is_some());

        assert_eq!(router.len(), 2);
        assert_eq!(router.predicates(), vec!["hello", "world"]);

        for (_, handler) in router.route("hello sun") {
            handler.handle("hello sun").await.unwrap();
        }
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }
}
