//! Shared state store abstraction and backends
//!
//! The match state lives in a key-addressed mutable store shared by both
//! clients. The store's only concurrency primitive is read / write /
//! subscribe-with-current-value-pushed-on-every-update, so every
//! exactly-once guarantee in the engine is built from client-side
//! idempotence on top of this trait.

pub mod keys;
pub mod memory;
pub mod remote;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

/// Store handle shared by all engine components
pub type SharedStore = Arc<dyn StateStore>;

/// The shared state store as seen by the engine
///
/// Subscriptions cover a subtree: a subscriber of `game/attacks` is notified
/// when any descendant changes, and receives the current value of its own
/// path immediately after subscribing. Writing `Value::Null` removes a node.
pub trait StateStore: Send + Sync {
    /// Read the value at `key`, `None` if absent
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    /// Replace the value at `key`
    fn write<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Merge `fields` (an object) into the value at `key`
    fn update<'a>(&'a self, key: &'a str, fields: Value) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Remove the value at `key`
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Subscribe to `key`; the current value is pushed immediately, then on
    /// every change under the subtree
    fn subscribe<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Subscription, StoreError>>;

    /// Ask the store to remove `key` when this client's connection drops
    fn register_remove_on_disconnect<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// A stream of values for one subscribed path
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx }
    }

    /// Next pushed value; `None` once the store side is gone
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Store API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse store value: {0}")]
    Parse(#[from] serde_json::Error),
}
