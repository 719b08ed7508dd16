//! Event publisher trait and in-memory implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::events::SpinEvent;

/// Best-effort publisher of integration events.
///
/// Sagas only publish through detached tasks, so a failure here never fails
/// a saga.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SpinEvent) -> Result<()>;
}

/// In-memory publisher that records events for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<RwLock<Vec<SpinEvent>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all published events in order.
    pub async fn events(&self) -> Vec<SpinEvent> {
        self.events.read().await.clone()
    }

    /// Returns the published events of one type.
    pub async fn events_of_type(&self, event_type: &str) -> Vec<SpinEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Configures the publisher to fail every publish call.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: SpinEvent) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SagaError::Unavailable("event bus unreachable".to_string()));
        }
        tracing::debug!(event_type = event.event_type(), saga_id = %event.saga_id(), "event published");
        self.events.write().await.push(event);
        Ok(())
    }
}
