//! Session admission - identity, presence, seating
//!
//! Admission is the only path into a match: it writes the presence record,
//! registers its disconnect cleanup, starts the heartbeat, and seats the
//! player into the shared match state. Calling it again for a player who is
//! already present is a page/status refresh, not a new join.

pub mod presence;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::game::PlayerRole;
use crate::store::{keys, SharedStore, StoreError};
use crate::util::time::unix_millis;

use presence::PresenceRecord;

/// Opaque stable player identity, generated once per client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identity; callers persist it across page loads
    pub fn generate() -> Self {
        Self(format!("player_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Singleton seating record for a match
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStateRecord {
    pub first_player: PlayerId,
    pub second_player: Option<PlayerId>,
    pub game_started: bool,
}

/// Result of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Fresh join, seated with the given role
    Seated(PlayerRole),
    /// Already present; treated as a page/status refresh
    Refreshed(PlayerRole),
    /// Capacity reached, admission refused
    Full,
}

/// Admits a player into the match and keeps their presence alive
pub struct SessionAdmission {
    store: SharedStore,
    player_id: PlayerId,
    config: Arc<EngineConfig>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionAdmission {
    pub fn new(store: SharedStore, player_id: PlayerId, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            player_id,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Admit this player, seating them if a slot is free.
    ///
    /// Capacity counts presence entries whose heartbeat age is below the
    /// liveness threshold, so a stale entry does not block a new join.
    pub async fn admit(&self, page: &str) -> Result<AdmissionOutcome, StoreError> {
        let players = self.store.read(keys::PLAYERS).await?;
        let players = presence::parse_players(players.as_ref());

        if players.contains_key(self.player_id.as_str()) {
            self.write_presence(page).await?;
            self.start_heartbeat();
            return match self.seat().await? {
                Some(role) => Ok(AdmissionOutcome::Refreshed(role)),
                None => Ok(AdmissionOutcome::Full),
            };
        }

        let active = presence::active_count(&players, unix_millis(), self.config.liveness_threshold);
        if active >= self.config.max_players {
            info!(player_id = %self.player_id, active, "admission refused: match is full");
            return Ok(AdmissionOutcome::Full);
        }

        self.write_presence(page).await?;
        self.store
            .register_remove_on_disconnect(&keys::player(self.player_id.as_str()))
            .await?;
        self.start_heartbeat();

        match self.seat().await? {
            Some(role) => {
                info!(player_id = %self.player_id, ?role, "player admitted");
                Ok(AdmissionOutcome::Seated(role))
            }
            None => Ok(AdmissionOutcome::Full),
        }
    }

    /// Update the presence record's current page
    pub async fn update_page(&self, page: &str) -> Result<(), StoreError> {
        self.write_presence(page).await
    }

    /// Set this player's ready flag
    pub async fn set_ready(&self, ready: bool) -> Result<(), StoreError> {
        self.store
            .update(&keys::player(self.player_id.as_str()), json!({ "ready": ready }))
            .await
    }

    /// Seat this player into the match state.
    ///
    /// First ever admission creates the state; a second distinct identity
    /// takes the second seat, marks the match started and hands the opening
    /// turn to the first player. Returns `None` when both seats are taken
    /// by other players.
    async fn seat(&self) -> Result<Option<PlayerRole>, StoreError> {
        let current = self.store.read(keys::MATCH_STATE).await?;
        let state = current.and_then(|v| serde_json::from_value::<MatchStateRecord>(v).ok());

        let Some(mut state) = state else {
            let state = MatchStateRecord {
                first_player: self.player_id.clone(),
                second_player: None,
                game_started: false,
            };
            self.store
                .write(keys::MATCH_STATE, serde_json::to_value(&state)?)
                .await?;
            return Ok(Some(PlayerRole::First));
        };

        if state.first_player == self.player_id {
            return Ok(Some(PlayerRole::First));
        }

        match &state.second_player {
            Some(second) if *second == self.player_id => Ok(Some(PlayerRole::Second)),
            Some(_) => {
                warn!(player_id = %self.player_id, "both seats taken, no role assigned");
                Ok(None)
            }
            None => {
                state.second_player = Some(self.player_id.clone());
                state.game_started = true;
                let first = state.first_player.clone();
                self.store
                    .write(keys::MATCH_STATE, serde_json::to_value(&state)?)
                    .await?;
                self.store
                    .write(keys::CURRENT_TURN, json!(first.as_str()))
                    .await?;
                info!(player_id = %self.player_id, opening_turn = %first, "second player seated, match started");
                Ok(Some(PlayerRole::Second))
            }
        }
    }

    async fn write_presence(&self, page: &str) -> Result<(), StoreError> {
        let record = PresenceRecord {
            joined: true,
            timestamp: unix_millis(),
            current_page: page.to_string(),
            ready: false,
        };
        self.store
            .write(
                &keys::player(self.player_id.as_str()),
                serde_json::to_value(&record)?,
            )
            .await
    }

    /// Refresh the presence timestamp on a fixed interval
    fn start_heartbeat(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = keys::player(self.player_id.as_str());
        let period = self.config.heartbeat_interval;

        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // presence was written just now, skip the immediate tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = store.update(&key, json!({ "timestamp": unix_millis() })).await {
                    warn!(error = %err, "failed to refresh presence heartbeat");
                }
            }
        }));
    }

    /// Stop the heartbeat
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionAdmission {
    fn drop(&mut self) {
        self.stop();
    }
}
