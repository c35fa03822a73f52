//! End-to-end duel scenarios over the in-memory store
//!
//! Two engine clients share one backend, exactly as two browsers share the
//! hosted store: every effect travels through writes and change
//! notifications, never through process-local shortcuts.

use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use ship_duel_core::{
    AdmissionOutcome, BoardFrame, DuelEngine, EngineConfig, GameEvent, MemoryBackend, PlayerId,
    PlayerRole, ShipClass, ShipPlacement, StateStore, Vec3,
};

fn test_config() -> EngineConfig {
    EngineConfig {
        heartbeat_interval: Duration::from_millis(25),
        liveness_threshold: Duration::from_millis(400),
        forfeit_grace: Duration::from_millis(400),
        ..EngineConfig::default()
    }
}

fn engine(backend: &MemoryBackend, id: &str, config: &EngineConfig) -> DuelEngine {
    DuelEngine::new(
        config.clone(),
        Arc::new(backend.connect()),
        PlayerId::new(id),
    )
}

fn cell_center(config: &EngineConfig, col: i32, row: i32) -> Vec3 {
    let cell = config.grid.cell_size();
    let half = config.grid.extent / 2.0;
    Vec3::new(
        col as f32 * cell - half + cell / 2.0,
        0.0,
        row as f32 * cell - half + cell / 2.0,
    )
}

/// Enemy-board local position of a canonical cell
fn enemy_local(config: &EngineConfig, col: i32, row: i32) -> Vec3 {
    let center = cell_center(config, col, row);
    Vec3::new(center.x + config.grid.enemy_offset_x, center.y, center.z)
}

fn fleet(config: &EngineConfig) -> Vec<ShipPlacement> {
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

/// Defended cells of the fleet, in canonical grid coordinates
fn defended_cells(config: &EngineConfig) -> Vec<(i32, i32)> {
    let frame = BoardFrame::new(config.grid.extent, config.grid.divisions, 0.0);
    fleet(config)
        .iter()
        .flat_map(|ship| frame.occupied_cells(ship))
        .map(|cell| (cell.col, cell.row))
        .collect()
}

async fn wait_for_turn(engine: &DuelEngine) {
    timeout(Duration::from_secs(2), async {
        while !engine.can_act() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine never received the turn");
}

async fn wait_for_enemy_fleet(engine: &DuelEngine) {
    timeout(Duration::from_secs(2), async {
        while !engine.enemy_fleet_ready() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("enemy fleet never arrived");
}

async fn next_match_ended(rx: &mut broadcast::Receiver<GameEvent>) -> bool {
    timeout(Duration::from_secs(3), async {
        loop {
            match rx.recv().await {
                Ok(GameEvent::MatchEnded { won }) => break won,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("no end-of-match declaration arrived")
}

/// Join both players and start both engines with the shared demo fleet
async fn seated_pair(
    backend: &MemoryBackend,
    config: &EngineConfig,
) -> (DuelEngine, DuelEngine) {
    let a = engine(backend, "p1", config);
    let b = engine(backend, "p2", config);

    assert_eq!(
        a.join("/battle").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::First)
    );
    assert_eq!(
        b.join("/battle").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::Second)
    );

    a.place_fleet(fleet(config)).await.unwrap();
    b.place_fleet(fleet(config)).await.unwrap();

    a.start().await.unwrap();
    b.start().await.unwrap();

    wait_for_enemy_fleet(&a).await;
    wait_for_enemy_fleet(&b).await;

    (a, b)
}

#[tokio::test]
async fn two_joins_fill_both_seats_in_either_order() {
    let config = test_config();

    let backend = MemoryBackend::new();
    let a = engine(&backend, "p1", &config);
    let b = engine(&backend, "p2", &config);
    assert_eq!(
        a.join("/").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::First)
    );
    assert_eq!(
        b.join("/").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::Second)
    );

    // reversed order: whoever arrives first becomes the first player
    let backend = MemoryBackend::new();
    let b = engine(&backend, "p2", &config);
    let a = engine(&backend, "p1", &config);
    assert_eq!(
        b.join("/").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::First)
    );
    assert_eq!(
        a.join("/").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::Second)
    );
}

#[tokio::test]
async fn third_join_is_refused_while_two_are_live() {
    let config = test_config();
    let backend = MemoryBackend::new();

    let a = engine(&backend, "p1", &config);
    let b = engine(&backend, "p2", &config);
    let c = engine(&backend, "p3", &config);

    a.join("/").await.unwrap();
    b.join("/").await.unwrap();
    assert_eq!(c.join("/").await.unwrap(), AdmissionOutcome::Full);
}

#[tokio::test]
async fn rejoin_is_a_refresh_not_a_new_seat() {
    let config = test_config();
    let backend = MemoryBackend::new();

    let a = engine(&backend, "p1", &config);
    assert_eq!(
        a.join("/").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::First)
    );
    assert_eq!(
        a.join("/fleet").await.unwrap(),
        AdmissionOutcome::Refreshed(PlayerRole::First)
    );

    // the refresh did not consume the second seat
    let b = engine(&backend, "p2", &config);
    assert_eq!(
        b.join("/").await.unwrap(),
        AdmissionOutcome::Seated(PlayerRole::Second)
    );
}

#[tokio::test]
async fn opening_turn_belongs_to_the_first_player() {
    let config = test_config();
    let backend = MemoryBackend::new();
    let (a, b) = seated_pair(&backend, &config).await;

    wait_for_turn(&a).await;
    assert!(a.can_act());
    assert!(!b.can_act());
}

#[tokio::test]
async fn out_of_turn_attack_is_rejected_without_effect() {
    let config = test_config();
    let backend = MemoryBackend::new();
    let (_a, b) = seated_pair(&backend, &config).await;

    // the opening turn is not b's
    let accepted = b.attempt_attack(enemy_local(&config, 0, 0)).await.unwrap();
    assert!(!accepted);

    let observer = backend.connect();
    let records = observer.read("game/attacks/player_attacks").await.unwrap();
    assert!(records.is_none());
}

#[tokio::test]
async fn accepted_attack_writes_one_record_and_flips_the_turn() {
    let config = test_config();
    let backend = MemoryBackend::new();
    let (a, b) = seated_pair(&backend, &config).await;

    wait_for_turn(&a).await;
    assert!(a.attempt_attack(enemy_local(&config, 0, 0)).await.unwrap());
    assert!(!a.can_act());
    wait_for_turn(&b).await;

    let observer = backend.connect();
    let records = observer
        .read("game/attacks/player_attacks/p2")
        .await
        .unwrap()
        .expect("record written");
    let map = records.as_object().unwrap();
    assert_eq!(map.len(), 1);
    assert!(map.contains_key("0_0"));
}

#[tokio::test]
async fn repeat_coordinate_is_rejected_before_any_acknowledgement() {
    let config = test_config();
    let backend = MemoryBackend::new();
    let (a, _b) = seated_pair(&backend, &config).await;

    wait_for_turn(&a).await;
    assert!(a.attempt_attack(enemy_local(&config, 2, 3)).await.unwrap());
    // the second submission races the first record's notification
    assert!(!a.attempt_attack(enemy_local(&config, 2, 3)).await.unwrap());

    let observer = backend.connect();
    let records = observer
        .read("game/attacks/player_attacks/p2")
        .await
        .unwrap()
        .expect("record written");
    assert_eq!(records.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn full_duel_declares_each_side_exactly_once() {
    let config = test_config();
    let backend = MemoryBackend::new();
    let (a, b) = seated_pair(&backend, &config).await;

    let mut a_events = a.subscribe_events();
    let mut b_events = b.subscribe_events();

    let hits: Vec<(i32, i32)> = defended_cells(&config);
    assert_eq!(hits.len(), 17);
    let mut misses: VecDeque<(i32, i32)> = (0..8)
        .flat_map(|col| (0..8).map(move |row| (col, row)))
        .filter(|cell| !hits.contains(cell))
        .collect();

    for (i, &(col, row)) in hits.iter().enumerate() {
        wait_for_turn(&a).await;
        assert!(a.attempt_attack(enemy_local(&config, col, row)).await.unwrap());

        if i < hits.len() - 1 {
            wait_for_turn(&b).await;
            let (col, row) = misses.pop_front().unwrap();
            assert!(b.attempt_attack(enemy_local(&config, col, row)).await.unwrap());
        }
    }

    assert!(next_match_ended(&mut a_events).await);
    assert!(!next_match_ended(&mut b_events).await);

    // the latch holds: no second declaration on either side
    assert!(
        timeout(Duration::from_millis(200), next_match_ended(&mut a_events))
            .await
            .is_err()
    );

    let standings = a.standings().await.unwrap();
    assert_eq!(standings.get("p2"), Some(&17));

    // the match is over for both sides
    assert!(!a.can_act());
    assert!(!b.can_act());
}

#[tokio::test]
async fn every_ship_sinks_when_its_cells_are_exhausted() {
    let config = test_config();
    let backend = MemoryBackend::new();
    let (a, b) = seated_pair(&backend, &config).await;

    let mut a_events = a.subscribe_events();

    let hits: Vec<(i32, i32)> = defended_cells(&config);
    let mut misses: VecDeque<(i32, i32)> = (0..8)
        .flat_map(|col| (0..8).map(move |row| (col, row)))
        .filter(|cell| !hits.contains(cell))
        .collect();

    for (i, &(col, row)) in hits.iter().enumerate() {
        wait_for_turn(&a).await;
        a.attempt_attack(enemy_local(&config, col, row)).await.unwrap();
        if i < hits.len() - 1 {
            wait_for_turn(&b).await;
            let (col, row) = misses.pop_front().unwrap();
            b.attempt_attack(enemy_local(&config, col, row)).await.unwrap();
        }
    }

    let mut sunk = Vec::new();
    let deadline = timeout(Duration::from_secs(3), async {
        while sunk.len() < 5 {
            match a_events.recv().await {
                Ok(GameEvent::ShipSunk { shape, .. }) => sunk.push(shape),
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    })
    .await;
    assert!(deadline.is_ok(), "expected five sunk ships, saw {sunk:?}");
}

#[tokio::test]
async fn restarted_client_cannot_reattack_a_coordinate() {
    let config = test_config();
    let backend = MemoryBackend::new();
    let (a, b) = seated_pair(&backend, &config).await;

    wait_for_turn(&a).await;
    assert!(a.attempt_attack(enemy_local(&config, 0, 0)).await.unwrap());
    wait_for_turn(&b).await;
    assert!(b.attempt_attack(enemy_local(&config, 7, 7)).await.unwrap());

    // simulate a page reload: a fresh engine with the same identity
    // (the old engine only goes quiet; its presence record stays put)
    a.shutdown();
    let a2 = engine(&backend, "p1", &config);
    assert_eq!(
        a2.join("/battle").await.unwrap(),
        AdmissionOutcome::Refreshed(PlayerRole::First)
    );
    a2.start().await.unwrap();

    wait_for_turn(&a2).await;
    assert!(!a2.attempt_attack(enemy_local(&config, 0, 0)).await.unwrap());
    assert!(a2.attempt_attack(enemy_local(&config, 0, 1)).await.unwrap());
}

#[tokio::test]
async fn departed_opponent_forfeits_after_the_grace_period() {
    let config = EngineConfig {
        heartbeat_interval: Duration::from_millis(20),
        liveness_threshold: Duration::from_millis(100),
        forfeit_grace: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let backend = MemoryBackend::new();

    let a = engine(&backend, "p1", &config);
    let b_store = Arc::new(backend.connect());
    let b = DuelEngine::new(config.clone(), b_store.clone(), PlayerId::new("p2"));

    a.join("/").await.unwrap();
    b.join("/").await.unwrap();

    let mut a_events = a.subscribe_events();
    a.start().await.unwrap();

    // b's client goes away: heartbeat stops, presence is removed
    b.shutdown();
    b_store.disconnect();

    assert!(next_match_ended(&mut a_events).await);
    assert!(!a.can_act());
}
