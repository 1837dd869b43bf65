use anyhow::{anyhow, Result};
use core_types::ChatMessage;
use tokio::sync::broadcast;

/// Everything that flows through the intake loop.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Chat(ChatMessage),
    /// Deferred request for a reconciliation pass.
    CollectRequest,
}

/// Broadcast fan-out between the feed tasks and the engine loop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) -> Result<()> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|err| anyhow!("bus publish failed: {err}"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
