//! Fleet persistence and opponent fleet discovery
//!
//! A player's ship layout is a plain key/value record in the store. The
//! opponent's layout is found by watching the players node until a second
//! identity appears, then following that player's ships key.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::game::board::ShipPlacement;
use crate::session::{presence, PlayerId};
use crate::store::{keys, SharedStore, StoreError};

pub struct FleetStore {
    store: SharedStore,
    player_id: PlayerId,
}

impl FleetStore {
    pub fn new(store: SharedStore, player_id: PlayerId) -> Self {
        Self { store, player_id }
    }

    /// Persist this player's ship layout
    pub async fn save(&self, ships: &[ShipPlacement]) -> Result<(), StoreError> {
        self.store
            .write(
                &keys::ships(self.player_id.as_str()),
                serde_json::to_value(ships)?,
            )
            .await
    }

    /// Load this player's ship layout, empty if never saved
    pub async fn load(&self) -> Result<Vec<ShipPlacement>, StoreError> {
        let value = self.store.read(&keys::ships(self.player_id.as_str())).await?;
        Ok(value.map(parse_ships).unwrap_or_default())
    }

    /// Remove this player's stored layout
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store
            .remove(&keys::ships(self.player_id.as_str()))
            .await
    }

    /// Follow the opponent's fleet: wait for a second player to appear,
    /// then deliver every version of their ship layout to `on_fleet`.
    pub fn watch_opponent(
        self: &Arc<Self>,
        on_fleet: impl Fn(PlayerId, Vec<ShipPlacement>) + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut players_sub = match this.store.subscribe(keys::PLAYERS).await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(error = %err, "could not subscribe to players");
                    return;
                }
            };

            let opponent = loop {
                match players_sub.next().await {
                    Some(value) => {
                        if let Some(found) = presence::other_player(&value, &this.player_id) {
                            break found;
                        }
                    }
                    None => return,
                }
            };
            drop(players_sub);

            let mut ships_sub = match this.store.subscribe(&keys::ships(opponent.as_str())).await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(opponent = %opponent, error = %err, "could not subscribe to opponent ships");
                    return;
                }
            };

            while let Some(value) = ships_sub.next().await {
                let ships = parse_ships(value);
                if !ships.is_empty() {
                    on_fleet(opponent.clone(), ships);
                }
            }
        })
    }
}

fn parse_ships(value: Value) -> Vec<ShipPlacement> {
    match serde_json::from_value::<Vec<ShipPlacement>>(value) {
        Ok(ships) => ships,
        Err(_) => Vec::new(),
    }
}
