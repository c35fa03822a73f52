//! Ship Duel - headless demo duel
//!
//! Runs two engine clients against one in-memory store and plays a seeded
//! duel to the win declaration. This exercises the full coordination path -
//! admission, seating, turn alternation, attack records, hit resolution and
//! the end-of-match declaration - without a rendering layer.

use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::time::{sleep, timeout, Duration};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ship_duel_core::{
    BoardFrame, DuelEngine, EngineConfig, GameEvent, MemoryBackend, PlayerId, ShipClass,
    ShipPlacement, Vec3,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env()?;
    init_tracing(&config.log_level);

    info!("Starting demo duel over the in-memory store");

    let backend = MemoryBackend::new();
    let alice = DuelEngine::new(
        config.clone(),
        Arc::new(backend.connect()),
        PlayerId::new("alice"),
    );
    let bob = DuelEngine::new(
        config.clone(),
        Arc::new(backend.connect()),
        PlayerId::new("bob"),
    );

    let mut alice_events = alice.subscribe_events();
    let mut bob_events = bob.subscribe_events();

    let outcome = alice.join("/battle").await?;
    info!(player = %alice.player_id(), ?outcome, "joined");
    let outcome = bob.join("/battle").await?;
    info!(player = %bob.player_id(), ?outcome, "joined");

    let fleet = demo_fleet(&config);
    alice.place_fleet(fleet.clone()).await?;
    bob.place_fleet(fleet.clone()).await?;

    alice.start().await?;
    bob.start().await?;

    // wait until both sides have received the opposing fleet
    timeout(Duration::from_secs(5), async {
        while !(alice.enemy_fleet_ready() && bob.enemy_fleet_ready()) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    // alice shoots every defended cell; bob shoots only open water
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut alice_targets = attack_positions(&config, &fleet, true, &mut rng);
    let mut bob_targets = attack_positions(&config, &fleet, false, &mut rng);

    let mut alice_done = false;
    let mut bob_done = false;

    let result = timeout(Duration::from_secs(30), async {
        loop {
            tokio::select! {
                event = alice_events.recv() => {
                    match event {
                        Ok(GameEvent::TurnChanged { is_my_turn: true }) => {
                            if let Some(target) = alice_targets.pop_front() {
                                alice.attempt_attack(target).await?;
                            }
                        }
                        Ok(GameEvent::ShipSunk { owner, shape }) => {
                            info!(side = "alice", ?owner, ?shape, "ship sunk");
                        }
                        Ok(GameEvent::MatchEnded { won }) => {
                            info!(side = "alice", won, "duel finished");
                            alice_done = true;
                        }
                        _ => {}
                    }
                }
                event = bob_events.recv() => {
                    match event {
                        Ok(GameEvent::TurnChanged { is_my_turn: true }) => {
                            if let Some(target) = bob_targets.pop_front() {
                                bob.attempt_attack(target).await?;
                            }
                        }
                        Ok(GameEvent::MatchEnded { won }) => {
                            info!(side = "bob", won, "duel finished");
                            bob_done = true;
                        }
                        _ => {}
                    }
                }
            }
            if alice_done && bob_done {
                break;
            }
        }
        anyhow::Ok(())
    })
    .await;
    result??;

    let standings = alice.standings().await?;
    info!(?standings, "final standings");

    alice.shutdown();
    bob.shutdown();
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// A fixed, non-overlapping fleet in the canonical (placement) frame
fn demo_fleet(config: &EngineConfig) -> Vec<ShipPlacement> {
    let anchors = [
        (ShipClass::Carrier, 3, 0, FRAC_PI_2),
        (ShipClass::Destroyer, 4, 2, FRAC_PI_2),
        (ShipClass::Drone, 5, 4, FRAC_PI_2),
        (ShipClass::Gunship, 1, 6, 0.0),
        (ShipClass::Submarine, 7, 1, 0.0),
    ];

    anchors
        .iter()
        .map(|&(shape, col, row, rot)| ShipPlacement {
            shape,
            position: cell_center(config, col, row),
            rotation: Vec3::new(0.0, rot, 0.0),
            scale: Vec3::new(1.0, 1.0, 1.0),
        })
        .collect()
}

/// Enemy-board local positions for either every defended cell (`hits`) or
/// every open-water cell, shuffled
fn attack_positions(
    config: &EngineConfig,
    fleet: &[ShipPlacement],
    hits: bool,
    rng: &mut ChaCha8Rng,
) -> VecDeque<Vec3> {
    let canonical = BoardFrame::new(config.grid.extent, config.grid.divisions, 0.0);
    let occupied: Vec<_> = fleet
        .iter()
        .flat_map(|ship| canonical.occupied_cells(ship))
        .collect();

    let side = config.grid.divisions as i32;
    let mut cells: Vec<(i32, i32)> = (0..side)
        .flat_map(|col| (0..side).map(move |row| (col, row)))
        .filter(|&(col, row)| {
            occupied
                .iter()
                .any(|c| c.col == col && c.row == row)
                == hits
        })
        .collect();
    cells.shuffle(rng);

    cells
        .into_iter()
        .map(|(col, row)| {
            let center = cell_center(config, col, row);
            Vec3::new(center.x + config.grid.enemy_offset_x, center.y, center.z)
        })
        .collect()
}

/// Center of a cell in the canonical frame
fn cell_center(config: &EngineConfig, col: i32, row: i32) -> Vec3 {
    let cell = config.grid.cell_size();
    let half = config.grid.extent / 2.0;
    Vec3::new(
        col as f32 * cell - half + cell / 2.0,
        0.0,
        row as f32 * cell - half + cell / 2.0,
    )
}
