//! Match coordination modules

pub mod attacks;
pub mod board;
pub mod fleet;
pub mod turns;
pub mod wins;

pub use attacks::{AttackLedger, AttackRecord};
pub use board::{BoardFrame, BoardTracker, Cell, ShipClass, ShipPlacement, Vec3};
pub use fleet::FleetStore;
pub use turns::TurnArbiter;
pub use wins::WinTracker;

/// Seat assigned to a player at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerRole {
    /// Created the match; receives the opening turn
    First,
    /// Joined an existing match
    Second,
}

/// Which board a ship belongs to, from the observing client's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipOwner {
    Mine,
    Theirs,
}

/// Events surfaced to the presentation layer.
///
/// Positions are in the observing client's local board frame; the engine
/// performs all translation from the canonical frame.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// The turn pointer changed
    TurnChanged { is_my_turn: bool },
    /// An attack record was resolved against a board
    AttackResolved {
        position: Vec3,
        attacker_is_me: bool,
        hit: bool,
    },
    /// Every cell of a ship has been hit
    ShipSunk { owner: ShipOwner, shape: ShipClass },
    /// A hit counter crossed the threshold or the opponent forfeited
    MatchEnded { won: bool },
}
