//! Ship Duel Core - match coordination and combat resolution engine
//!
//! This crate coordinates a two-player turn-based naval duel whose
//! authoritative state lives in a shared key/value store that pushes change
//! notifications to subscribers. It handles:
//! - Session admission with presence heartbeats and capacity enforcement
//! - Turn arbitration (seating, the turn pointer, out-of-turn rejection)
//! - Attack recording, broadcast and frame translation
//! - Ship occupancy geometry and hit/sunk resolution
//! - Win detection with a one-shot end-of-match declaration
//!
//! Rendering, effects and input handling are external collaborators; they
//! consume the [`engine::DuelEngine`] event stream and never touch the store
//! directly.

pub mod config;
pub mod engine;
pub mod game;
pub mod session;
pub mod store;
pub mod util;

pub use config::{ConfigError, EngineConfig, GridConfig};
pub use engine::DuelEngine;
pub use game::board::{BoardFrame, Cell, ShipClass, ShipPlacement, Vec3};
pub use game::{GameEvent, PlayerRole, ShipOwner};
pub use session::{AdmissionOutcome, PlayerId};
pub use store::memory::MemoryBackend;
pub use store::remote::RemoteStore;
pub use store::{SharedStore, StateStore, StoreError, Subscription};
