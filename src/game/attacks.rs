//! Attack recording, broadcast and resolution
//!
//! Each accepted attack is written exactly once, keyed by its canonical
//! cell under the defending board. Both clients consume the same records
//! through the store subscription; resolution is keyed by canonical
//! coordinate, never by notification event, so redelivered or replayed
//! records cannot double-count.
//!
//! The dedup table is rebuilt from the attacks subtree on every start, so
//! a restarted client cannot re-attack a coordinate it attacked before.

use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GridConfig;
use crate::game::board::{BoardFrame, BoardTracker, ShipClass, ShipPlacement, Vec3};
use crate::game::turns::TurnArbiter;
use crate::game::wins::WinTracker;
use crate::game::{GameEvent, ShipOwner};
use crate::session::PlayerId;
use crate::store::{keys, SharedStore, StoreError};
use crate::util::time::unix_millis;

/// One recorded attack, stored under the defending board.
/// The position is in the canonical frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackRecord {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub is_hit: bool,
    pub timestamp: u64,
    pub attacker_id: PlayerId,
}

pub struct AttackLedger {
    store: SharedStore,
    player_id: PlayerId,
    grid: GridConfig,
    /// Canonical frame: board geometry with no render offset
    canonical: BoardFrame,
    turns: Arc<TurnArbiter>,
    wins: Arc<WinTracker>,
    /// Canonical cell keys already attempted against the opponent's board
    attempted: DashSet<String>,
    /// Record paths (`defender/cell`) already resolved locally
    processed: DashSet<String>,
    /// This player's own fleet (incoming attacks resolve here)
    my_board: Mutex<BoardTracker>,
    /// Mirror of the opponent's fleet (outgoing attacks resolve here)
    enemy_board: Mutex<BoardTracker>,
    events: broadcast::Sender<GameEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AttackLedger {
    pub fn new(
        store: SharedStore,
        player_id: PlayerId,
        grid: GridConfig,
        turns: Arc<TurnArbiter>,
        wins: Arc<WinTracker>,
        events: broadcast::Sender<GameEvent>,
    ) -> Self {
        let canonical = BoardFrame::new(grid.extent, grid.divisions, 0.0);
        Self {
            store,
            player_id,
            grid,
            canonical,
            turns,
            wins,
            attempted: DashSet::new(),
            processed: DashSet::new(),
            my_board: Mutex::new(BoardTracker::new(canonical)),
            enemy_board: Mutex::new(BoardTracker::new(canonical)),
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Install this player's fleet
    pub fn set_my_fleet(&self, ships: Vec<ShipPlacement>) {
        let sunk = self.my_board.lock().set_ships(ships);
        self.emit_sunk(ShipOwner::Mine, sunk);
    }

    /// Install the opponent's fleet mirror
    pub fn set_enemy_fleet(&self, ships: Vec<ShipPlacement>) {
        let sunk = self.enemy_board.lock().set_ships(ships);
        self.emit_sunk(ShipOwner::Theirs, sunk);
    }

    pub fn my_fleet_is_empty(&self) -> bool {
        self.my_board.lock().is_empty()
    }

    pub fn enemy_fleet_is_empty(&self) -> bool {
        self.enemy_board.lock().is_empty()
    }

    /// Replay existing records, then follow the attacks subtree.
    ///
    /// The replay happens before this returns: the dedup table is complete
    /// by the time the caller can submit an attack.
    pub async fn start(self: &Arc<Self>) -> Result<(), StoreError> {
        let mut sub = self.store.subscribe(keys::ATTACKS).await?;
        if let Some(initial) = sub.next().await {
            self.ingest(&initial);
        }

        let this = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(async move {
            while let Some(value) = sub.next().await {
                this.ingest(&value);
            }
        }));
        Ok(())
    }

    /// Attempt an attack on a cell of the enemy board, given in this
    /// client's local frame. Returns false on a silent rejection.
    pub async fn attempt(&self, local: Vec3) -> Result<bool, StoreError> {
        if self.wins.is_over() {
            debug!("attack rejected: match already over");
            return Ok(false);
        }
        if !self.turns.can_act() {
            debug!(player_id = %self.player_id, "attack rejected: not this player's turn");
            return Ok(false);
        }

        let Some(defender) = self.turns.opponent() else {
            warn!("attack rejected: no opponent seated");
            return Ok(false);
        };

        let canonical_pos = Vec3::new(local.x - self.grid.enemy_offset_x, local.y, local.z);
        let cell = self.canonical.discretize(canonical_pos);
        if !self.attempted.insert(cell.key()) {
            debug!(cell = %cell.key(), "attack rejected: coordinate already attacked");
            return Ok(false);
        }

        let hit = self.enemy_board.lock().is_ship_at(cell);
        let record = AttackRecord {
            x: canonical_pos.x,
            y: canonical_pos.y,
            z: canonical_pos.z,
            is_hit: hit,
            timestamp: unix_millis(),
            attacker_id: self.player_id.clone(),
        };

        let key = keys::attack(defender.as_str(), &cell.key());
        let value = serde_json::to_value(&record)?;
        if let Err(err) = self.store.write(&key, value).await {
            // the record never landed, allow a retry on this cell
            self.attempted.remove(&cell.key());
            return Err(err);
        }

        info!(player_id = %self.player_id, cell = %cell.key(), hit, "attack recorded");

        if hit {
            self.wins.record_hit(&defender).await?;
        }
        self.turns.pass_turn().await?;
        Ok(true)
    }

    /// Process a full snapshot of the attacks subtree
    fn ingest(&self, value: &Value) {
        let Some(boards) = value.as_object() else {
            return;
        };
        for (defender, records) in boards {
            let Some(records) = records.as_object() else {
                continue;
            };
            for (cell_key, record) in records {
                self.process(defender, cell_key, record);
            }
        }
    }

    /// Resolve one record, once
    fn process(&self, defender: &str, cell_key: &str, value: &Value) {
        if !self.processed.insert(format!("{defender}/{cell_key}")) {
            return;
        }

        let record: AttackRecord = match serde_json::from_value(value.clone()) {
            Ok(record) => record,
            Err(err) => {
                warn!(cell = %cell_key, error = %err, "skipping malformed attack record");
                return;
            }
        };

        let attacker_is_me = record.attacker_id == self.player_id;
        let incoming = defender == self.player_id.as_str();

        // any record on the opponent's board blocks re-attempting its cell
        if !incoming {
            self.attempted.insert(cell_key.to_string());
        }

        let canonical_pos = Vec3::new(record.x, record.y, record.z);
        let cell = self.canonical.discretize(canonical_pos);

        let (resolution, owner) = if incoming {
            (self.my_board.lock().resolve(cell), ShipOwner::Mine)
        } else {
            (self.enemy_board.lock().resolve(cell), ShipOwner::Theirs)
        };
        if let Some(shape) = resolution.sunk {
            let _ = self.events.send(GameEvent::ShipSunk { owner, shape });
        }

        // translate into whichever of this client's boards the record is on
        let offset = if attacker_is_me {
            self.grid.enemy_offset_x
        } else {
            self.grid.own_offset_x
        };
        let position = Vec3::new(record.x + offset, record.y, record.z);
        let _ = self.events.send(GameEvent::AttackResolved {
            position,
            attacker_is_me,
            hit: record.is_hit,
        });
    }

    fn emit_sunk(&self, owner: ShipOwner, shapes: Vec<ShipClass>) {
        for shape in shapes {
            let _ = self.events.send(GameEvent::ShipSunk { owner, shape });
        }
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for AttackLedger {
    fn drop(&mut self) {
        self.stop();
    }
}
