use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use quay_types::addr::LogicAddr;
use quay_types::network::Envelope;
use tracing::debug;

/// Handles one message kind: `(sender, payload)`.
pub type MessageHandler = Arc<dyn Fn(LogicAddr, &[u8]) + Send + Sync>;

/// Message handlers keyed by message kind.
pub struct MessageRegistry {
    handlers: Mutex<HashMap<u16, MessageHandler>>,
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler. Overwrites any previous handler for the same kind.
    pub fn register<F>(&self, kind: u16, handler: F)
    where
        F: Fn(LogicAddr, &[u8]) + Send + Sync + 'static,
    {
        self.lock().insert(kind, Arc::new(handler));
    }

    /// Remove the handler for `kind`.
    pub fn unregister(&self, kind: u16) -> bool {
        self.lock().remove(&kind).is_some()
    }

    pub fn is_registered(&self, kind: u16) -> bool {
        self.lock().contains_key(&kind)
    }

    /// Run the handler registered for the envelope's kind.
    ///
    /// Returns `false` when no handler is registered; the envelope is dropped.
    pub fn dispatch(&self, envelope: &Envelope) -> bool {
        // Clone out so the handler runs without the lock held.
        let handler = self.lock().get(&envelope.kind).cloned();
        match handler {
            Some(handler) => {
                handler(envelope.from, &envelope.payload);
                true
            }
            None => {
                debug!(kind = envelope.kind, from = %envelope.from, "no handler for message kind");
                false
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u16, MessageHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
