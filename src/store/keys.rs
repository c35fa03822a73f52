//! Store key layout for a match
//!
//! All match state hangs off a single `game` root so one subscription can
//! observe the whole match when needed.

/// Seating record: first/second player and the started flag
pub const MATCH_STATE: &str = "game/state";

/// Identity of the player currently allowed to act
pub const CURRENT_TURN: &str = "game/currentTurn";

/// Presence records, one child per player
pub const PLAYERS: &str = "game/players";

/// Attack records, grouped per defending board
pub const ATTACKS: &str = "game/attacks/player_attacks";

/// Hit counters, one child per player
pub const HITS: &str = "game/hits";

/// Presence record for one player
pub fn player(id: &str) -> String {
    format!("{PLAYERS}/{id}")
}

/// Ship layout for one player
pub fn ships(id: &str) -> String {
    format!("game/ships/{id}")
}

/// Hit counter for one player
pub fn hits(id: &str) -> String {
    format!("{HITS}/{id}")
}

/// Attack records against one defending board
pub fn board_attacks(defender: &str) -> String {
    format!("{ATTACKS}/{defender}")
}

/// A single attack record, keyed by canonical cell
pub fn attack(defender: &str, cell_key: &str) -> String {
    format!("{ATTACKS}/{defender}/{cell_key}")
}
