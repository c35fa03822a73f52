//! Process-local store backend
//!
//! Implements the same notification semantics as the hosted store: values
//! form a JSON tree, a write notifies every subscriber whose path overlaps
//! the written path, and each subscriber receives the current value of its
//! own path. Used by the demo binary and the test suite, where both clients
//! of a match run inside one process.

use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{StateStore, StoreError, Subscription};

/// The shared tree behind every connected [`MemoryStore`]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    tree: Value,
    watchers: Vec<Watcher>,
}

struct Watcher {
    path: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tree: Value::Null,
                watchers: Vec::new(),
            })),
        }
    }

    /// Open a per-client connection to the backend
    pub fn connect(&self) -> MemoryStore {
        MemoryStore {
            inner: Arc::clone(&self.inner),
            on_disconnect: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's connection to a [`MemoryBackend`]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    on_disconnect: Mutex<Vec<String>>,
}

impl MemoryStore {
    /// Drop the connection: runs the registered disconnect removals
    pub fn disconnect(&self) {
        let keys: Vec<String> = self.on_disconnect.lock().drain(..).collect();
        for key in keys {
            self.apply(&key, Value::Null);
        }
    }

    fn snapshot(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock();
        get_path(&inner.tree, key).cloned()
    }

    /// Mutate the tree at `key` and notify overlapping watchers
    fn apply(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock();
        set_path(&mut inner.tree, key, value);
        notify(&mut inner, key);
    }

    fn merge(&self, key: &str, fields: Value) {
        let mut inner = self.inner.lock();
        match fields {
            Value::Object(map) => {
                for (field, value) in map {
                    let child = format!("{key}/{field}");
                    set_path(&mut inner.tree, &child, value);
                }
            }
            other => set_path(&mut inner.tree, key, other),
        }
        notify(&mut inner, key);
    }
}

impl StateStore for MemoryStore {
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Option<Value>, StoreError>> {
        async move { Ok(self.snapshot(key)) }.boxed()
    }

    fn write<'a>(
        &'a self,
        key: &'a str,
        value: Value,
    ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.apply(key, value);
            Ok(())
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        key: &'a str,
        fields: Value,
    ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.merge(key, fields);
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(
        &'a self,
        key: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.apply(key, Value::Null);
            Ok(())
        }
        .boxed()
    }

    fn subscribe<'a>(
        &'a self,
        key: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Subscription, StoreError>> {
        async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut inner = self.inner.lock();
            let current = get_path(&inner.tree, key).cloned().unwrap_or(Value::Null);
            let _ = tx.send(current);
            inner.watchers.push(Watcher {
                path: key.to_string(),
                tx,
            });
            Ok(Subscription::new(rx))
        }
        .boxed()
    }

    fn register_remove_on_disconnect<'a>(
        &'a self,
        key: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
        async move {
            self.on_disconnect.lock().push(key.to_string());
            Ok(())
        }
        .boxed()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Push the current value of every watcher whose path overlaps `changed`
fn notify(inner: &mut Inner, changed: &str) {
    let tree = inner.tree.clone();
    inner.watchers.retain(|watcher| {
        if !paths_overlap(&watcher.path, changed) {
            return !watcher.tx.is_closed();
        }
        let value = get_path(&tree, &watcher.path)
            .cloned()
            .unwrap_or(Value::Null);
        watcher.tx.send(value).is_ok()
    });
}

/// True when one path is a segment-wise prefix of the other
fn paths_overlap(a: &str, b: &str) -> bool {
    let a: Vec<&str> = segments(a).collect();
    let b: Vec<&str> = segments(b).collect();
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn get_path<'v>(tree: &'v Value, path: &str) -> Option<&'v Value> {
    let mut node = tree;
    for seg in segments(path) {
        node = node.get(seg)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Set the value at `path`, creating intermediate objects; `Null` removes
fn set_path(tree: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        *tree = value;
        return;
    };

    let mut node = tree;
    for seg in parents {
        node = as_object(node).entry(seg.to_string()).or_insert(Value::Null);
    }

    let map = as_object(node);
    if value.is_null() {
        map.remove(*last);
    } else {
        map.insert(last.to_string(), value);
    }
}

fn as_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("value was just coerced to an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let backend = MemoryBackend::new();
        let store = backend.connect();

        store.write("game/state", json!({"a": 1})).await.unwrap();
        let value = store.read("game/state").await.unwrap();
        assert_eq!(value, Some(json!({"a": 1})));

        assert_eq!(store.read("game/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn subscribe_pushes_current_value_first() {
        let backend = MemoryBackend::new();
        let store = backend.connect();

        store.write("game/currentTurn", json!("p1")).await.unwrap();
        let mut sub = store.subscribe("game/currentTurn").await.unwrap();
        assert_eq!(sub.next().await, Some(json!("p1")));

        store.write("game/currentTurn", json!("p2")).await.unwrap();
        assert_eq!(sub.next().await, Some(json!("p2")));
    }

    #[tokio::test]
    async fn parent_subscription_sees_child_writes() {
        let backend = MemoryBackend::new();
        let store = backend.connect();

        let mut sub = store.subscribe("game/hits").await.unwrap();
        assert_eq!(sub.next().await, Some(Value::Null));

        store.write("game/hits/p1", json!(3)).await.unwrap();
        assert_eq!(sub.next().await, Some(json!({"p1": 3})));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let backend = MemoryBackend::new();
        let store = backend.connect();

        store
            .write("game/players/p1", json!({"joined": true, "timestamp": 1}))
            .await
            .unwrap();
        store
            .update("game/players/p1", json!({"timestamp": 2}))
            .await
            .unwrap();

        let value = store.read("game/players/p1").await.unwrap();
        assert_eq!(value, Some(json!({"joined": true, "timestamp": 2})));
    }

    #[tokio::test]
    async fn disconnect_runs_registered_removals() {
        let backend = MemoryBackend::new();
        let store = backend.connect();
        let observer = backend.connect();

        store
            .write("game/players/p1", json!({"joined": true}))
            .await
            .unwrap();
        store
            .register_remove_on_disconnect("game/players/p1")
            .await
            .unwrap();

        let mut sub = observer.subscribe("game/players").await.unwrap();
        let _ = sub.next().await;

        store.disconnect();
        assert_eq!(sub.next().await, Some(json!({})));
        assert_eq!(observer.read("game/players/p1").await.unwrap(), None);
    }
}
