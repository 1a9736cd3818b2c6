//! Headless replication tests: authoritative sessions feeding client
//! replicas through a recording sink, no sockets involved.

use std::path::PathBuf;

use arena_client::{ApplyOutcome, ClientReplica};
use arena_server::session::{PlayerSeat, RecordingSink, SessionManager};
use arena_shared::grid::{GridMap, MapConfig};
use arena_shared::protocol::{Command, CommandPayload, GridDirection};

fn seat(connection_id: u64) -> PlayerSeat {
    PlayerSeat {
        connection_id,
        player_name: format!("P{connection_id}"),
        player_uid: format!("uid-{connection_id}"),
    }
}

fn arena_config(w: i32, h: i32) -> MapConfig {
    MapConfig {
        map_name: "headless".to_string(),
        grid_width: w,
        grid_height: h,
        cell_size: 1.0,
        ..Default::default()
    }
}

/// Manager backed by a stored, obstacle-free 10×10 map so movement
/// assertions stay deterministic.
fn manager(tag: &str) -> SessionManager {
    let dir = std::env::temp_dir().join(format!("arena_it_{tag}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp maps dir");
    let map = GridMap::create_empty("headless", 10, 10, 1.0, arena_shared::math::Vec3::ZERO);
    std::fs::write(
        dir.join("headless.json"),
        serde_json::to_string(&map).expect("serialize map"),
    )
    .expect("write map");
    SessionManager::new(dir, 4.0)
}

/// Applies every recorded command addressed to `target`, asserting none of
/// them tripped the resync gate.
fn deliver_all(sink: &RecordingSink, target: u64, replica: &mut ClientReplica) {
    for cmd in sink.commands_for(target) {
        let outcome = replica.apply(&cmd);
        assert!(
            !matches!(outcome, ApplyOutcome::NeedsResync(_)),
            "unexpected resync on {cmd:?}"
        );
    }
}

#[tokio::test]
async fn replica_converges_on_spawn_move_remove() -> anyhow::Result<()> {
    let mut mgr = manager("converge");
    let mut sink = RecordingSink::default();
    assert!(
        mgr.create_session("g", "sess", arena_config(10, 10), &[seat(1), seat(2)], &mut sink)
            .await
    );

    let mut replica = ClientReplica::new("sess");
    deliver_all(&sink, 1, &mut replica);
    assert_eq!(replica.entity_count(), 2);
    assert!(replica.map_config().is_some());

    // Move player 1 for a second, then sweep.
    sink.batches.clear();
    mgr.set_player_input("sess", 1, GridDirection::Right);
    for _ in 0..60 {
        mgr.step_all(1.0 / 60.0);
    }
    mgr.replicate_dirty(&mut sink).await;
    deliver_all(&sink, 1, &mut replica);

    // Replica cell matches the authoritative store.
    let instance = mgr.instance("g").expect("session");
    let entity_id = instance.world.entity_for_owner(1).expect("pawn");
    let auth = instance.world.snapshot(entity_id).expect("snapshot");
    let view = replica.entity(&entity_id.to_string()).expect("view");
    assert_eq!((view.cell_x, view.cell_y), (auth.cell_x, auth.cell_y));

    // Departure propagates as a removal.
    sink.batches.clear();
    mgr.remove_player_from_session("g", 2, &mut sink).await;
    deliver_all(&sink, 1, &mut replica);
    assert_eq!(replica.entity_count(), 1);

    Ok(())
}

#[tokio::test]
async fn lost_sweep_triggers_resync_and_recovery() -> anyhow::Result<()> {
    let mut mgr = manager("lost");
    let mut sink = RecordingSink::default();
    mgr.create_session("g", "sess", arena_config(10, 10), &[seat(1)], &mut sink)
        .await;

    let mut replica = ClientReplica::new("sess");
    deliver_all(&sink, 1, &mut replica);

    // First sweep is "lost": recorded but never delivered.
    sink.batches.clear();
    mgr.set_player_input("sess", 1, GridDirection::Right);
    for _ in 0..30 {
        mgr.step_all(1.0 / 60.0);
    }
    mgr.replicate_dirty(&mut sink).await;
    assert!(!sink.commands_for(1).is_empty());

    // Second sweep arrives with a version gap. Change axis so the pawn
    // keeps moving even if the first leg reached the map edge.
    sink.batches.clear();
    mgr.set_player_input("sess", 1, GridDirection::Up);
    for _ in 0..30 {
        mgr.step_all(1.0 / 60.0);
    }
    mgr.replicate_dirty(&mut sink).await;

    let gapped = sink.commands_for(1);
    assert!(!gapped.is_empty());
    let mut needs_resync = false;
    for cmd in &gapped {
        if matches!(replica.apply(cmd), ApplyOutcome::NeedsResync(_)) {
            needs_resync = true;
        }
    }
    assert!(needs_resync, "version gap should demand a resync");

    // Client sends a resync request; the answering snapshot converges the
    // replica without bumping the session version.
    sink.batches.clear();
    let before = mgr.instance("g").expect("session").version();
    mgr.handle_command(1, &Command::resync_request("sess"), &mut sink)
        .await;
    assert_eq!(mgr.instance("g").expect("session").version(), before);

    deliver_all(&sink, 1, &mut replica);
    let instance = mgr.instance("g").expect("session");
    let entity_id = instance.world.entity_for_owner(1).expect("pawn");
    let auth = instance.world.snapshot(entity_id).expect("snapshot");
    let view = replica.entity(&entity_id.to_string()).expect("view");
    assert_eq!((view.cell_x, view.cell_y), (auth.cell_x, auth.cell_y));
    assert_eq!(replica.last_applied_version(), before);

    // Later sweeps apply cleanly again.
    sink.batches.clear();
    mgr.set_player_input("sess", 1, GridDirection::Left);
    for _ in 0..30 {
        mgr.step_all(1.0 / 60.0);
    }
    mgr.replicate_dirty(&mut sink).await;
    deliver_all(&sink, 1, &mut replica);

    Ok(())
}

#[tokio::test]
async fn late_joiner_sees_existing_entities() -> anyhow::Result<()> {
    let mut mgr = manager("late");
    let mut sink = RecordingSink::default();
    mgr.create_session("g", "sess", arena_config(10, 10), &[seat(1)], &mut sink)
        .await;

    sink.batches.clear();
    let id = mgr.add_player_to_session("g", seat(2), &mut sink).await;
    assert!(id.is_some());

    // Existing observer learns about the joiner via a single spawn.
    let to_existing = sink.commands_for(1);
    assert_eq!(to_existing.len(), 1);
    assert!(matches!(to_existing[0].payload, CommandPayload::SpawnEntity(_)));

    // The joiner gets the full picture.
    let mut replica = ClientReplica::new("sess");
    deliver_all(&sink, 2, &mut replica);
    assert_eq!(replica.entity_count(), 2);
    assert!(replica.entity_for_owner(2).is_some());

    Ok(())
}
