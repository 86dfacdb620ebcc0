//! Entity change events and listeners.
//!
//! Every façade write fires one [`EntityEvent`] after the store call
//! returns. Events go to the registered listeners of their kind and to
//! channel subscribers. In cluster mode the same events arrive from other
//! processes through the shared bus and are dispatched here too.
//!
//! # Usage
//!
//! ```rust
//! use entidal_core::{EntityListeners, EntityEvent, EventKind, Context};
//!
//! let listeners = EntityListeners::new();
//! let receiver = listeners.subscribe();
//! listeners.on_entity_created(|_ctx, event| {
//!     assert_eq!(event.entity, "User");
//!     Ok(())
//! });
//!
//! listeners
//!     .dispatch(&Context::system(), &EntityEvent::created("User"))
//!     .unwrap();
//! assert_eq!(receiver.recv().unwrap().kind, EventKind::Created);
//! ```

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use entidal_codec::{from_envelope, to_envelope, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::error;

/// Kind of entity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Rows were created or recovered.
    Created,
    /// Rows were updated or restored.
    Updated,
    /// Rows were removed.
    Removed,
}

/// A change to the rows of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent {
    /// Kind of change.
    pub kind: EventKind,
    /// Entity name.
    pub entity: String,
    /// Affected ids, when known.
    pub ids: Option<Vec<Value>>,
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    kind: EventKind,
    entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<serde_json::Value>>,
}

impl EntityEvent {
    /// A creation event.
    pub fn created(entity: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Created,
            entity: entity.into(),
            ids: None,
        }
    }

    /// An update event for `ids`, or for unknown rows.
    pub fn updated(entity: impl Into<String>, ids: Option<Vec<Value>>) -> Self {
        Self {
            kind: EventKind::Updated,
            entity: entity.into(),
            ids,
        }
    }

    /// A removal event for `ids`, or for unknown rows.
    pub fn removed(entity: impl Into<String>, ids: Option<Vec<Value>>) -> Self {
        Self {
            kind: EventKind::Removed,
            entity: entity.into(),
            ids,
        }
    }

    /// Encodes the event for the bus. Ids keep their exact type.
    ///
    /// # Errors
    ///
    /// Returns an error if an id cannot be encoded.
    pub fn to_message(&self) -> CoreResult<String> {
        let ids = match &self.ids {
            Some(ids) => Some(
                ids.iter()
                    .map(to_envelope)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(CoreError::cache)?,
            ),
            None => None,
        };
        let wire = WireEvent {
            kind: self.kind,
            entity: self.entity.clone(),
            ids,
        };
        serde_json::to_string(&wire).map_err(CoreError::cache)
    }

    /// Decodes a bus message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is malformed.
    pub fn from_message(message: &str) -> CoreResult<Self> {
        let wire: WireEvent = serde_json::from_str(message).map_err(CoreError::cache)?;
        let ids = match wire.ids {
            Some(ids) => Some(
                ids.iter()
                    .map(from_envelope)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(CoreError::cache)?,
            ),
            None => None,
        };
        Ok(Self {
            kind: wire.kind,
            entity: wire.entity,
            ids,
        })
    }
}

/// A listener callback.
pub type EntityListener = Arc<dyn Fn(&Context, &EntityEvent) -> CoreResult<()> + Send + Sync>;

/// Registered listeners and subscribers.
#[derive(Default)]
pub struct EntityListeners {
    created: RwLock<Vec<EntityListener>>,
    updated: RwLock<Vec<EntityListener>>,
    removed: RwLock<Vec<EntityListener>>,
    subscribers: RwLock<Vec<Sender<EntityEvent>>>,
}

impl std::fmt::Debug for EntityListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityListeners")
            .field("created", &self.created.read().len())
            .field("updated", &self.updated.read().len())
            .field("removed", &self.removed.read().len())
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

impl EntityListeners {
    /// Creates an empty listener set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for creations.
    pub fn on_entity_created<F>(&self, listener: F)
    where
        F: Fn(&Context, &EntityEvent) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.created.write().push(Arc::new(listener));
    }

    /// Registers a listener for updates.
    pub fn on_entity_updated<F>(&self, listener: F)
    where
        F: Fn(&Context, &EntityEvent) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.updated.write().push(Arc::new(listener));
    }

    /// Registers a listener for removals.
    pub fn on_entity_removed<F>(&self, listener: F)
    where
        F: Fn(&Context, &EntityEvent) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.removed.write().push(Arc::new(listener));
    }

    /// Registers one listener for both updates and removals.
    pub fn on_updated_or_removed<F>(&self, listener: F)
    where
        F: Fn(&Context, &EntityEvent) -> CoreResult<()> + Send + Sync + 'static,
    {
        let listener: EntityListener = Arc::new(listener);
        self.updated.write().push(Arc::clone(&listener));
        self.removed.write().push(listener);
    }

    /// Subscribes to every future event.
    ///
    /// The receiver should be drained regularly to avoid unbounded memory
    /// growth.
    pub fn subscribe(&self) -> Receiver<EntityEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Number of live channel subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Runs the listeners of the event's kind, then feeds subscribers.
    ///
    /// # Errors
    ///
    /// Stops at the first failing listener and returns its error after
    /// logging it.
    pub fn dispatch(&self, ctx: &Context, event: &EntityEvent) -> CoreResult<()> {
        let listeners: Vec<EntityListener> = match event.kind {
            EventKind::Created => self.created.read().clone(),
            EventKind::Updated => self.updated.read().clone(),
            EventKind::Removed => self.removed.read().clone(),
        };
        for listener in listeners {
            if let Err(err) = listener(ctx, event) {
                error!(entity = %event.entity, kind = ?event.kind, error = %err, "entity listener failed");
                return Err(err);
            }
        }
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn listeners_run_by_kind() {
        let listeners = EntityListeners::new();
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        listeners.on_updated_or_removed(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let ctx = Context::system();
        listeners.dispatch(&ctx, &EntityEvent::created("User")).unwrap();
        listeners.dispatch(&ctx, &EntityEvent::updated("User", None)).unwrap();
        listeners.dispatch(&ctx, &EntityEvent::removed("User", None)).unwrap();
        assert_eq!(updates.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_listener_stops_dispatch() {
        let listeners = EntityListeners::new();
        let later = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&later);
        listeners.on_entity_created(|_, _| Err(CoreError::listener("boom")));
        listeners.on_entity_created(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let err = listeners
            .dispatch(&Context::system(), &EntityEvent::created("User"))
            .unwrap_err();
        assert_eq!(err.code(), "ListenerError");
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_subscribers_are_removed() {
        let listeners = EntityListeners::new();
        let rx = listeners.subscribe();
        drop(listeners.subscribe());
        listeners
            .dispatch(&Context::system(), &EntityEvent::created("User"))
            .unwrap();
        assert_eq!(listeners.subscriber_count(), 1);
        assert_eq!(rx.try_recv().unwrap().entity, "User");
    }

    #[test]
    fn message_keeps_id_types() {
        let event = EntityEvent::removed(
            "User",
            Some(vec![Value::ObjectId("65a1b2c3d4e5f60718293a4b".into()), Value::Integer(7)]),
        );
        let decoded = EntityEvent::from_message(&event.to_message().unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert!(EntityEvent::from_message("{").is_err());
    }
}
