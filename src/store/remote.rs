//! Remote store client
//!
//! Talks to a Firebase-style JSON REST endpoint: GET/PUT/PATCH/DELETE on
//! `{base}/{path}.json`. Change notifications are derived by a per-
//! subscription polling watcher, so the [`StateStore`] contract (current
//! value pushed immediately, then on every change) holds without a
//! streaming transport.

use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::EngineConfig;

use super::{StateStore, StoreError, Subscription};

/// Client for the hosted store
pub struct RemoteStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    poll_interval: Duration,
    on_disconnect: Mutex<Vec<String>>,
}

impl RemoteStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config
                .store_url
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            auth_token: config.store_auth.clone(),
            poll_interval: config.store_poll_interval,
            on_disconnect: Mutex::new(Vec::new()),
        }
    }

    /// REST URL for a store path
    fn node_url(&self, path: &str) -> String {
        match &self.auth_token {
            Some(token) => format!("{}/{}.json?auth={}", self.base_url, path, token),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }

    /// The REST transport has no connection-drop hook, so disconnect
    /// removals run when the client is closed explicitly.
    pub async fn close(&self) -> Result<(), StoreError> {
        let keys: Vec<String> = self.on_disconnect.lock().drain(..).collect();
        for key in keys {
            delete_value(&self.client, &self.node_url(&key)).await?;
        }
        Ok(())
    }
}

impl StateStore for RemoteStore {
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Option<Value>, StoreError>> {
        async move {
            let value = fetch_value(&self.client, &self.node_url(key)).await?;
            if value.is_null() {
                Ok(None)
            } else {
                Ok(Some(value))
            }
        }
        .boxed()
    }

    fn write<'a>(
        &'a self,
        key: &'a str,
        value: Value,
    ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let url = self.node_url(key);
            let response = self.client.put(&url).json(&value).send().await?;
            check_status(response).await
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        key: &'a str,
        fields: Value,
    ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let url = self.node_url(key);
            let response = self.client.patch(&url).json(&fields).send().await?;
            check_status(response).await
        }
        .boxed()
    }

    fn remove<'a>(
        &'a self,
        key: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<(), StoreError>> {
        async move { delete_value(&self.client, &self.node_url(key)).await }.boxed()
    }

    fn subscribe<'a>(
        &'a self,
        key: &'a str,
    ) -> futures::future::BoxFuture<'a, Result<Subscription, StoreError>> {
        async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let client = self.client.clone();
            let url = self.node_url(key);
            let poll_interval = self.poll_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                let mut last: Option<Value> = None;

                loop {
                    ticker.tick().await;
                    if tx.is_closed() {
                        break;
                    }

                    match fetch_value(&client, &url).await {
                        Ok(value) => {
                            if last.as_ref() != Some(&value) {
                                last = Some(value.clone());
                                if tx.send(value).is_err() {
                                    break;
                                }
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "store poll failed");
                        }
                    }
                }
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

async fn fetch_value(client: &Client, url: &str) -> Result<Value, StoreError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

async fn delete_value(client: &Client, url: &str) -> Result<(), StoreError> {
    let response = client.delete(url).send().await?;
    check_status(response).await
}

async fn check_status(response: reqwest::Response) -> Result<(), StoreError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(StoreError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}
