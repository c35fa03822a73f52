//! Win detection
//!
//! One counter per player, keyed by the defender: it counts confirmed hits
//! against that player's board. When any counter reaches the fleet's total
//! defended cell count, the defender's opponent has won. A one-shot latch
//! guarantees a single end-of-match declaration no matter how many
//! notifications or forfeit signals arrive afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::game::board::ShipClass;
use crate::game::GameEvent;
use crate::session::PlayerId;
use crate::store::{keys, SharedStore, StoreError};

pub struct WinTracker {
    store: SharedStore,
    player_id: PlayerId,
    threshold: u64,
    game_over: AtomicBool,
    events: broadcast::Sender<GameEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WinTracker {
    pub fn new(
        store: SharedStore,
        player_id: PlayerId,
        events: broadcast::Sender<GameEvent>,
    ) -> Self {
        Self {
            store,
            player_id,
            threshold: ShipClass::total_defended_cells() as u64,
            game_over: AtomicBool::new(false),
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Ensure this player's counter exists
    pub async fn init(&self) -> Result<(), StoreError> {
        let key = keys::hits(self.player_id.as_str());
        if self.store.read(&key).await?.is_none() {
            self.store.write(&key, json!(0)).await?;
        }
        Ok(())
    }

    /// Watch all counters and declare the end of the match the first time
    /// any of them crosses the threshold
    pub async fn start(self: &Arc<Self>) -> Result<(), StoreError> {
        let mut sub = self.store.subscribe(keys::HITS).await?;
        if let Some(value) = sub.next().await {
            self.check_counters(&value);
        }
        let this = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(async move {
            while let Some(value) = sub.next().await {
                this.check_counters(&value);
            }
        }));
        Ok(())
    }

    fn check_counters(&self, value: &serde_json::Value) {
        let Some(counters) = value.as_object() else {
            return;
        };
        let crossed = counters
            .iter()
            .find(|(_, count)| count.as_u64().unwrap_or(0) >= self.threshold);
        if let Some((loser, _)) = crossed {
            self.declare(&PlayerId::new(loser.clone()));
        }
    }

    /// Record one confirmed hit against `defender`'s board.
    ///
    /// Returns true when this hit reached the threshold, i.e. the attack
    /// that produced it won the match.
    pub async fn record_hit(&self, defender: &PlayerId) -> Result<bool, StoreError> {
        let key = keys::hits(defender.as_str());
        let current = self
            .store
            .read(&key)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let next = current + 1;
        self.store.write(&key, json!(next)).await?;

        if next >= self.threshold {
            self.declare(defender);
            return Ok(true);
        }
        Ok(false)
    }

    /// Current hit counters per player
    pub async fn standings(&self) -> Result<HashMap<String, u64>, StoreError> {
        let value = self.store.read(keys::HITS).await?;
        let mut standings = HashMap::new();
        if let Some(counters) = value.as_ref().and_then(|v| v.as_object()) {
            for (id, count) in counters {
                standings.insert(id.clone(), count.as_u64().unwrap_or(0));
            }
        }
        Ok(standings)
    }

    pub fn is_over(&self) -> bool {
        self.game_over.load(Ordering::SeqCst)
    }

    /// Declare the end of the match with `loser` on the losing side.
    /// The latch makes repeated declarations no-ops.
    pub fn declare(&self, loser: &PlayerId) {
        if self.game_over.swap(true, Ordering::SeqCst) {
            return;
        }
        let won = *loser != self.player_id;
        info!(loser = %loser, won, "match ended");
        let _ = self.events.send(GameEvent::MatchEnded { won });
    }

    /// A departed player loses the match
    pub fn declare_forfeit(&self, departed: &PlayerId) {
        self.declare(departed);
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for WinTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;

    fn tracker(backend: &MemoryBackend, id: &str) -> (Arc<WinTracker>, broadcast::Receiver<GameEvent>) {
        let (events, rx) = broadcast::channel(16);
        let store: SharedStore = Arc::new(backend.connect());
        (
            Arc::new(WinTracker::new(store, PlayerId::new(id), events)),
            rx,
        )
    }

    #[tokio::test]
    async fn declaration_latch_holds() {
        let backend = MemoryBackend::new();
        let (wins, mut rx) = tracker(&backend, "p1");
        let loser = PlayerId::new("p2");

        wins.declare(&loser);
        wins.declare(&loser);
        wins.declare_forfeit(&loser);

        assert!(matches!(
            rx.try_recv(),
            Ok(GameEvent::MatchEnded { won: true })
        ));
        assert!(rx.try_recv().is_err());
        assert!(wins.is_over());
    }

    #[tokio::test]
    async fn record_hit_reports_threshold_crossing() {
        let backend = MemoryBackend::new();
        let (wins, _rx) = tracker(&backend, "p1");
        let defender = PlayerId::new("p2");

        for _ in 0..16 {
            assert!(!wins.record_hit(&defender).await.unwrap());
        }
        assert!(wins.record_hit(&defender).await.unwrap());

        let standings = wins.standings().await.unwrap();
        assert_eq!(standings.get("p2"), Some(&17));
    }

    #[tokio::test]
    async fn own_counter_crossing_means_defeat() {
        let backend = MemoryBackend::new();
        let (wins, mut rx) = tracker(&backend, "p1");

        wins.declare(&PlayerId::new("p1"));
        assert!(matches!(
            rx.try_recv(),
            Ok(GameEvent::MatchEnded { won: false })
        ));
    }
}
