//! Handlers that object notifications can target.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lifewire_types::ObjectNotification;

use crate::error::HandlerError;

/// Something a notification subscription can point at.
#[async_trait]
pub trait ObjectEventHandler: Send + Sync {
    /// Called once per `ObjectCreated` notification.
    async fn on_object_created(&self, notification: &ObjectNotification)
        -> Result<(), HandlerError>;

    /// Called once per `ObjectRemoved` notification. Ignored by default.
    async fn on_object_removed(
        &self,
        _notification: &ObjectNotification,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Handlers addressable by `target_handler_ref`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn ObjectEventHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ObjectEventHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Builder-style [`HandlerRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn ObjectEventHandler>) -> Self {
        self.register(name, handler);
        self
    }

    /// Looks up a handler.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ObjectEventHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
