//! Presence records and departure detection
//!
//! A player is "present" while their heartbeat is fresh. Departure has two
//! signals - the store removing the record on connection loss, and the
//! heartbeat going stale - and both are handled identically: the record is
//! no longer fresh, so the opponent is gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::game::wins::WinTracker;
use crate::session::{MatchStateRecord, PlayerId};
use crate::store::{keys, SharedStore};
use crate::util::time::{millis_since, unix_millis};

/// Liveness record for one player
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub joined: bool,
    /// Last heartbeat, unix milliseconds
    pub timestamp: u64,
    pub current_page: String,
    #[serde(default)]
    pub ready: bool,
}

/// Parse the players node, skipping malformed entries
pub fn parse_players(value: Option<&Value>) -> HashMap<String, PresenceRecord> {
    let mut players = HashMap::new();
    let Some(Value::Object(map)) = value else {
        return players;
    };
    for (id, record) in map {
        match serde_json::from_value::<PresenceRecord>(record.clone()) {
            Ok(record) => {
                players.insert(id.clone(), record);
            }
            Err(err) => warn!(player_id = %id, error = %err, "skipping malformed presence record"),
        }
    }
    players
}

/// Count presence entries whose heartbeat age is below `threshold`
pub fn active_count(
    players: &HashMap<String, PresenceRecord>,
    now: u64,
    threshold: Duration,
) -> usize {
    players
        .values()
        .filter(|p| now.saturating_sub(p.timestamp) < threshold.as_millis() as u64)
        .count()
}

/// First player id in the node that is not `me`
pub fn other_player(value: &Value, me: &PlayerId) -> Option<PlayerId> {
    let map = value.as_object()?;
    map.keys()
        .find(|id| id.as_str() != me.as_str())
        .map(|id| PlayerId::new(id.clone()))
}

/// Watches the opponent's presence and forfeits the match if they stay gone
/// past the grace period once the match has started.
pub struct PresenceMonitor;

impl PresenceMonitor {
    pub fn spawn(
        store: SharedStore,
        player_id: PlayerId,
        config: Arc<EngineConfig>,
        wins: Arc<WinTracker>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut players_sub = match store.subscribe(keys::PLAYERS).await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(error = %err, "presence monitor could not subscribe to players");
                    return;
                }
            };
            let mut state_sub = match store.subscribe(keys::MATCH_STATE).await {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(error = %err, "presence monitor could not subscribe to match state");
                    return;
                }
            };

            let mut ticker = tokio::time::interval(config.heartbeat_interval);
            let mut started = false;
            let mut opponent: Option<PlayerId> = None;
            let mut last_alive = unix_millis();

            let gone_threshold =
                (config.liveness_threshold + config.forfeit_grace).as_millis() as u64;

            loop {
                tokio::select! {
                    value = players_sub.next() => {
                        let Some(value) = value else { break };
                        if opponent.is_none() {
                            if let Some(found) = other_player(&value, &player_id) {
                                last_alive = unix_millis();
                                opponent = Some(found);
                            }
                        }
                        if let Some(op) = &opponent {
                            let players = parse_players(Some(&value));
                            if let Some(record) = players.get(op.as_str()) {
                                last_alive = last_alive.max(record.timestamp);
                            }
                        }
                    }
                    value = state_sub.next() => {
                        let Some(value) = value else { break };
                        if let Ok(state) = serde_json::from_value::<MatchStateRecord>(value) {
                            started = state.game_started;
                        }
                    }
                    _ = ticker.tick() => {
                        if !started || wins.is_over() {
                            continue;
                        }
                        let Some(op) = &opponent else { continue };
                        if millis_since(last_alive) > gone_threshold {
                            info!(opponent = %op, "opponent departed, forfeiting the match");
                            wins.declare_forfeit(op);
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(timestamp: u64) -> PresenceRecord {
        PresenceRecord {
            joined: true,
            timestamp,
            current_page: "/battle".to_string(),
            ready: false,
        }
    }

    #[test]
    fn active_count_filters_stale_entries() {
        let mut players = HashMap::new();
        players.insert("p1".to_string(), record(10_000));
        players.insert("p2".to_string(), record(500));

        let threshold = Duration::from_millis(10_000);
        assert_eq!(active_count(&players, 11_000, threshold), 1);
        assert_eq!(active_count(&players, 30_000, threshold), 0);
    }

    #[test]
    fn parse_players_skips_malformed_entries() {
        let value = json!({
            "p1": {"joined": true, "timestamp": 1, "currentPage": "/"},
            "junk": 42,
        });
        let players = parse_players(Some(&value));
        assert_eq!(players.len(), 1);
        assert!(players.contains_key("p1"));
    }

    #[test]
    fn other_player_ignores_self() {
        let me = PlayerId::new("p1");
        let value = json!({"p1": {}, "p2": {}});
        assert_eq!(other_player(&value, &me), Some(PlayerId::new("p2")));

        let only_me = json!({"p1": {}});
        assert_eq!(other_player(&only_me, &me), None);
    }
}
