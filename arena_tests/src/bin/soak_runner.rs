//! Headless replication soak runner.
//!
//! Drives a session manager hosting two concurrent sessions, with a set of
//! client replicas per session, through many simulated seconds of movement.
//! A configurable fraction of sweeps is "lost" to exercise the version-gap
//! path, and the run fails if any replica does not converge back onto the
//! authoritative state.
//!
//! Usage:
//!   cargo run -p arena_tests --bin soak_runner -- [ticks] [drop-every]

use std::path::PathBuf;

use arena_client::{ApplyOutcome, ClientReplica};
use arena_server::session::{PlayerSeat, RecordingSink, SessionManager};
use arena_shared::grid::MapConfig;
use arena_shared::protocol::{Command, GridDirection};
use tracing::info;

struct SoakSession {
    name: &'static str,
    uid: &'static str,
    /// Connection ids seated in this session.
    players: Vec<u64>,
}

fn direction_for(tick: u64, player: u64) -> GridDirection {
    match (tick / 30 + player) % 4 {
        0 => GridDirection::Right,
        1 => GridDirection::Down,
        2 => GridDirection::Left,
        _ => GridDirection::Up,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let ticks: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(3600);
    let drop_every: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(17);

    let sessions = vec![
        SoakSession {
            name: "soak-a",
            uid: "soak-uid-a",
            players: vec![1, 2, 3, 4],
        },
        SoakSession {
            name: "soak-b",
            uid: "soak-uid-b",
            players: vec![11, 12],
        },
    ];

    let mut mgr = SessionManager::new(PathBuf::from("soak-maps"), 4.0);
    let mut sink = RecordingSink::default();

    // (connection id, session uid) → replica.
    let mut replicas: Vec<(u64, &'static str, ClientReplica)> = Vec::new();

    for (i, session) in sessions.iter().enumerate() {
        let seats: Vec<PlayerSeat> = session
            .players
            .iter()
            .map(|&id| PlayerSeat {
                connection_id: id,
                player_name: format!("Soak{id}"),
                player_uid: format!("soak-player-{id}"),
            })
            .collect();

        let config = MapConfig {
            map_name: format!("soak-arena-{i}"),
            grid_width: 24,
            grid_height: 24,
            cell_size: 1.0,
            ..Default::default()
        };
        anyhow::ensure!(
            mgr.create_session(session.name, session.uid, config, &seats, &mut sink).await,
            "session {} creation failed",
            session.name
        );

        for &player in &session.players {
            let mut replica = ClientReplica::new(session.uid);
            for cmd in sink.commands_for(player) {
                replica.apply(&cmd);
            }
            replicas.push((player, session.uid, replica));
        }
        sink.batches.clear();
    }

    let mut sweeps: u64 = 0;
    let mut dropped: u64 = 0;
    let mut resyncs: u64 = 0;

    for tick in 0..ticks {
        for session in &sessions {
            for &player in &session.players {
                mgr.set_player_input(session.uid, player, direction_for(tick, player));
            }
        }
        mgr.step_all(1.0 / 60.0);

        // Replication sweep every third tick, mirroring a 20 Hz cadence.
        if tick % 3 != 0 {
            continue;
        }
        sink.batches.clear();
        mgr.replicate_dirty(&mut sink).await;
        if sink.batches.is_empty() {
            continue;
        }
        sweeps += 1;

        // Periodically drop the whole sweep for the first player of each
        // session to exercise the version-gap path.
        let drop_for_first = sweeps % drop_every == 0;
        if drop_for_first {
            dropped += 1;
        }

        for (player, session_uid, replica) in replicas.iter_mut() {
            let player = *player;
            let is_first = sessions.iter().any(|s| s.players.first() == Some(&player));
            if drop_for_first && is_first {
                continue;
            }
            let mut needs_resync = false;
            for cmd in sink.commands_for(player) {
                if matches!(replica.apply(&cmd), ApplyOutcome::NeedsResync(_)) {
                    needs_resync = true;
                }
            }
            if needs_resync {
                resyncs += 1;
                let mut resync_sink = RecordingSink::default();
                mgr.handle_command(player, &Command::resync_request(session_uid), &mut resync_sink)
                    .await;
                for cmd in resync_sink.commands_for(player) {
                    replica.apply(&cmd);
                }
            }
        }
    }

    // Final resync for anyone still behind, then verify convergence.
    let mut mismatches = 0u64;
    for (player, session_uid, replica) in replicas.iter_mut() {
        let mut resync_sink = RecordingSink::default();
        mgr.handle_command(*player, &Command::resync_request(session_uid), &mut resync_sink)
            .await;
        for cmd in resync_sink.commands_for(*player) {
            replica.apply(&cmd);
        }

        let session = sessions
            .iter()
            .find(|s| s.uid == *session_uid)
            .expect("session entry");
        let instance = mgr.instance(session.name).expect("session instance");
        for entity_id in instance.world.collect_all() {
            let auth = instance.world.snapshot(entity_id).expect("snapshot");
            match replica.entity(&entity_id.to_string()) {
                Some(view) if (view.cell_x, view.cell_y) == (auth.cell_x, auth.cell_y) => {}
                _ => mismatches += 1,
            }
        }
    }

    info!(ticks, sweeps, dropped, resyncs, mismatches, "Soak complete");
    if mismatches > 0 {
        anyhow::bail!("{mismatches} replica mismatches after soak");
    }
    println!("soak: {ticks} ticks, {sweeps} sweeps, {dropped} dropped, {resyncs} resyncs, OK");
    Ok(())
}
