//! Event publication seam.
//!
//! The orchestration core publishes committed transitions through an
//! [`EventPublisher`]; the deployment layer decides what bus sits behind it.
//! Tests use [`InMemoryBus`] to assert on exactly which events were emitted.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::events::BusEnvelope;

/// A sink for outbound state-change events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one envelope to the shared bus.
    async fn publish(&self, event: BusEnvelope) -> Result<()>;
}

/// In-memory bus capturing published events for assertions.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    events: Mutex<Vec<BusEnvelope>>,
}

impl InMemoryBus {
    /// Creates a new empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events published so far, in publication order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn events(&self) -> Result<Vec<BusEnvelope>> {
        Ok(self
            .events
            .lock()
            .map_err(|_: PoisonError<_>| Error::storage("lock poisoned"))?
            .clone())
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, event: BusEnvelope) -> Result<()> {
        self.events
            .lock()
            .map_err(|_: PoisonError<_>| Error::storage("lock poisoned"))?
            .push(event);
        Ok(())
    }
}
