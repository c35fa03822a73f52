//! Turn arbitration
//!
//! The turn pointer is a single store value naming the player currently
//! allowed to act. `can_act` is the one authorization gate for submitting
//! an attack; the pointer flips to the other seated player exactly once
//! per accepted attack, with no pass or extra-turn mechanism.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::game::{GameEvent, PlayerRole};
use crate::session::{MatchStateRecord, PlayerId};
use crate::store::{keys, SharedStore, StoreError};

pub struct TurnArbiter {
    store: SharedStore,
    player_id: PlayerId,
    seating: RwLock<Option<MatchStateRecord>>,
    my_turn: AtomicBool,
    events: broadcast::Sender<GameEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TurnArbiter {
    pub fn new(
        store: SharedStore,
        player_id: PlayerId,
        events: broadcast::Sender<GameEvent>,
    ) -> Self {
        Self {
            store,
            player_id,
            seating: RwLock::new(None),
            my_turn: AtomicBool::new(false),
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Follow the seating record and the turn pointer.
    ///
    /// The current value of both keys is applied before this returns, so
    /// `can_act` is accurate immediately after start.
    pub async fn start(self: &Arc<Self>) -> Result<(), StoreError> {
        let mut state_sub = self.store.subscribe(keys::MATCH_STATE).await?;
        if let Some(value) = state_sub.next().await {
            self.apply_state(value);
        }
        let this = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(async move {
            while let Some(value) = state_sub.next().await {
                this.apply_state(value);
            }
        }));

        let mut turn_sub = self.store.subscribe(keys::CURRENT_TURN).await?;
        if let Some(value) = turn_sub.next().await {
            self.apply_turn(value);
        }
        let this = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(async move {
            while let Some(value) = turn_sub.next().await {
                this.apply_turn(value);
            }
        }));

        Ok(())
    }

    fn apply_state(&self, value: Value) {
        let state = serde_json::from_value::<MatchStateRecord>(value).ok();
        *self.seating.write() = state;
    }

    fn apply_turn(&self, value: Value) {
        let mine = value.as_str() == Some(self.player_id.as_str());
        self.my_turn.store(mine, Ordering::SeqCst);
        let _ = self.events.send(GameEvent::TurnChanged { is_my_turn: mine });
    }

    /// True iff the match has started and the turn pointer names this player
    pub fn can_act(&self) -> bool {
        let started = self
            .seating
            .read()
            .as_ref()
            .map(|s| s.game_started)
            .unwrap_or(false);
        started && self.my_turn.load(Ordering::SeqCst)
    }

    /// This player's seat, if any
    pub fn role(&self) -> Option<PlayerRole> {
        let seating = self.seating.read();
        let state = seating.as_ref()?;
        if state.first_player == self.player_id {
            Some(PlayerRole::First)
        } else if state.second_player.as_ref() == Some(&self.player_id) {
            Some(PlayerRole::Second)
        } else {
            None
        }
    }

    /// The other seated player, if both seats are filled
    pub fn opponent(&self) -> Option<PlayerId> {
        let seating = self.seating.read();
        let state = seating.as_ref()?;
        if state.first_player == self.player_id {
            state.second_player.clone()
        } else if state.second_player.as_ref() == Some(&self.player_id) {
            Some(state.first_player.clone())
        } else {
            None
        }
    }

    /// Hand the turn to the seated player who is not this one.
    ///
    /// Re-reads the seating record rather than trusting the cached view,
    /// and degrades to a logged no-op on an inconsistent state.
    pub async fn pass_turn(&self) -> Result<(), StoreError> {
        let value = self.store.read(keys::MATCH_STATE).await?;
        let state = value.and_then(|v| serde_json::from_value::<MatchStateRecord>(v).ok());
        let Some(state) = state else {
            warn!("turn flip skipped: no match state");
            return Ok(());
        };

        let next = if state.first_player == self.player_id {
            state.second_player.clone()
        } else {
            Some(state.first_player.clone())
        };
        let Some(next) = next else {
            warn!("turn flip skipped: second seat empty");
            return Ok(());
        };

        // the notification will confirm, but give the turn up immediately
        self.my_turn.store(false, Ordering::SeqCst);
        self.store
            .write(keys::CURRENT_TURN, Value::String(next.as_str().to_string()))
            .await?;
        Ok(())
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for TurnArbiter {
    fn drop(&mut self) {
        self.stop();
    }
}
