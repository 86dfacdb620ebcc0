//! Cross-process event bus over the shared cache.
//!
//! Delivery is best effort. A process that misses a message (for example
//! because it was pruned before the next poll) only misses a listener call;
//! the rows it caches live in the shared store and are already invalidated.

use super::SharedCache;
use crate::error::CoreResult;
use crate::events::EntityEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// One process's endpoint on the bus.
#[derive(Debug)]
pub struct Bus {
    shared: Arc<SharedCache>,
    origin: String,
    cursor: Mutex<i64>,
}

impl Bus {
    /// Joins the bus. Messages published before joining are not delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the current position cannot be read.
    pub fn join(shared: Arc<SharedCache>) -> CoreResult<Self> {
        let cursor = shared.latest_seq()?;
        Ok(Self {
            shared,
            origin: uuid::Uuid::new_v4().to_string(),
            cursor: Mutex::new(cursor),
        })
    }

    /// Unique id of this endpoint.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Announces an event to the other processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be encoded or written.
    pub fn publish(&self, event: &EntityEvent) -> CoreResult<()> {
        let payload = event.to_message()?;
        let seq = self.shared.publish(&self.origin, &payload)?;
        debug!(seq, entity = %event.entity, kind = ?event.kind, "published entity event");
        Ok(())
    }

    /// Events published by other processes since the last poll.
    ///
    /// Malformed messages are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the messages cannot be read.
    pub fn poll(&self) -> CoreResult<Vec<EntityEvent>> {
        let mut cursor = self.cursor.lock();
        let messages = self.shared.messages_after(*cursor, &self.origin)?;
        let mut events = Vec::with_capacity(messages.len());
        for (seq, payload) in messages {
            *cursor = seq;
            match EntityEvent::from_message(&payload) {
                Ok(event) => events.push(event),
                Err(err) => warn!(seq, error = %err, "skipping malformed bus message"),
            }
        }
        Ok(events)
    }
}
