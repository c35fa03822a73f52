//! Duel engine - one instance per active match
//!
//! Composition root for the coordination components, constructed with an
//! injected store and identity. The presentation layer drives the match
//! through this type and consumes its [`GameEvent`] stream; it never talks
//! to the store directly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::game::attacks::AttackLedger;
use crate::game::board::{ShipClass, ShipPlacement, Vec3};
use crate::game::fleet::FleetStore;
use crate::game::turns::TurnArbiter;
use crate::game::wins::WinTracker;
use crate::game::{GameEvent, PlayerRole, ShipOwner};
use crate::session::presence::PresenceMonitor;
use crate::session::{AdmissionOutcome, PlayerId, SessionAdmission};
use crate::store::{SharedStore, StoreError};

pub struct DuelEngine {
    config: Arc<EngineConfig>,
    store: SharedStore,
    player_id: PlayerId,
    session: SessionAdmission,
    turns: Arc<TurnArbiter>,
    wins: Arc<WinTracker>,
    ledger: Arc<AttackLedger>,
    fleet: Arc<FleetStore>,
    events: broadcast::Sender<GameEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DuelEngine {
    pub fn new(config: EngineConfig, store: SharedStore, player_id: PlayerId) -> Self {
        let config = Arc::new(config);
        let (events, _) = broadcast::channel(256);

        let session =
            SessionAdmission::new(Arc::clone(&store), player_id.clone(), Arc::clone(&config));
        let turns = Arc::new(TurnArbiter::new(
            Arc::clone(&store),
            player_id.clone(),
            events.clone(),
        ));
        let wins = Arc::new(WinTracker::new(
            Arc::clone(&store),
            player_id.clone(),
            events.clone(),
        ));
        let ledger = Arc::new(AttackLedger::new(
            Arc::clone(&store),
            player_id.clone(),
            config.grid,
            Arc::clone(&turns),
            Arc::clone(&wins),
            events.clone(),
        ));
        let fleet = Arc::new(FleetStore::new(Arc::clone(&store), player_id.clone()));

        Self {
            config,
            store,
            player_id,
            session,
            turns,
            wins,
            ledger,
            fleet,
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// Admit this player into the match
    pub async fn join(&self, page: &str) -> Result<AdmissionOutcome, StoreError> {
        self.session.admit(page).await
    }

    /// Persist this player's fleet and use it for incoming resolution
    pub async fn place_fleet(&self, ships: Vec<ShipPlacement>) -> Result<(), StoreError> {
        self.fleet.save(&ships).await?;
        self.ledger.set_my_fleet(ships);
        Ok(())
    }

    /// Start all watchers. Call after [`join`](Self::join); the attack
    /// dedup table is complete when this returns.
    pub async fn start(&self) -> Result<(), StoreError> {
        self.wins.init().await?;
        self.turns.start().await?;
        self.wins.start().await?;

        // a restarted client recovers its own fleet from the store
        if self.ledger.my_fleet_is_empty() {
            let ships = self.fleet.load().await?;
            if !ships.is_empty() {
                self.ledger.set_my_fleet(ships);
            }
        }

        self.ledger.start().await?;

        let ledger = Arc::clone(&self.ledger);
        let fleet_task = self
            .fleet
            .watch_opponent(move |_, ships| ledger.set_enemy_fleet(ships));

        let monitor_task = PresenceMonitor::spawn(
            Arc::clone(&self.store),
            self.player_id.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.wins),
        );

        let mut tasks = self.tasks.lock();
        tasks.push(fleet_task);
        tasks.push(monitor_task);
        Ok(())
    }

    /// Drop this player's stored layout, ahead of a re-placement
    pub async fn clear_fleet(&self) -> Result<(), StoreError> {
        self.fleet.clear().await
    }

    /// Whether this player currently holds the right to act
    pub fn can_act(&self) -> bool {
        !self.wins.is_over() && self.turns.can_act()
    }

    /// This player's seat, once known
    pub fn role(&self) -> Option<PlayerRole> {
        self.turns.role()
    }

    /// Whether the opponent's fleet mirror has been received
    pub fn enemy_fleet_ready(&self) -> bool {
        !self.ledger.enemy_fleet_is_empty()
    }

    /// Attempt an attack on the enemy board at a local-frame position
    pub async fn attempt_attack(&self, local: Vec3) -> Result<bool, StoreError> {
        self.ledger.attempt(local).await
    }

    /// Hit counters per player
    pub async fn standings(&self) -> Result<HashMap<String, u64>, StoreError> {
        self.wins.standings().await
    }

    pub async fn set_ready(&self, ready: bool) -> Result<(), StoreError> {
        self.session.set_ready(ready).await
    }

    pub async fn update_page(&self, page: &str) -> Result<(), StoreError> {
        self.session.update_page(page).await
    }

    /// Raw event stream; subscribe before [`start`](Self::start) to see
    /// the initial turn notification
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub fn on_turn_changed(&self, callback: impl Fn(bool) + Send + 'static) {
        self.spawn_listener(move |event| {
            if let GameEvent::TurnChanged { is_my_turn } = event {
                callback(is_my_turn);
            }
        });
    }

    pub fn on_attack_resolved(&self, callback: impl Fn(Vec3, bool, bool) + Send + 'static) {
        self.spawn_listener(move |event| {
            if let GameEvent::AttackResolved {
                position,
                attacker_is_me,
                hit,
            } = event
            {
                callback(position, attacker_is_me, hit);
            }
        });
    }

    pub fn on_ship_sunk(&self, callback: impl Fn(ShipOwner, ShipClass) + Send + 'static) {
        self.spawn_listener(move |event| {
            if let GameEvent::ShipSunk { owner, shape } = event {
                callback(owner, shape);
            }
        });
    }

    pub fn on_match_ended(&self, callback: impl Fn(bool) + Send + 'static) {
        self.spawn_listener(move |event| {
            if let GameEvent::MatchEnded { won } = event {
                callback(won);
            }
        });
    }

    fn spawn_listener(&self, handler: impl Fn(GameEvent) + Send + 'static) {
        let mut rx = self.events.subscribe();
        self.tasks.lock().push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Stop every watcher task owned by this engine
    pub fn shutdown(&self) {
        self.session.stop();
        self.turns.stop();
        self.wins.stop();
        self.ledger.stop();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for DuelEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
