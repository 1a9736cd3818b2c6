//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p arena_client -- [--addr 127.0.0.1:41000] [--session lobby] [--name Ada]
//!
//! Connects to the server, joins a session, and mirrors the replicated
//! state, logging entity movement as it arrives. Input is synthesized
//! (a slow clockwise patrol) since this build has no window system.

use std::env;
use std::time::Duration;

use anyhow::Context;
use arena_client::client::{ClientState, GameClient};
use arena_client::input::InputState;
use arena_shared::config::ArenaConfig;
use tracing::info;

struct Args {
    cfg: ArenaConfig,
    session_name: String,
    player_uid: String,
}

fn parse_args() -> Args {
    let mut cfg = ArenaConfig::default();
    let mut session_name = "lobby".to_string();
    let mut player_uid = format!("uid-{}", std::process::id());

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--session" if i + 1 < args.len() => {
                session_name = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--uid" if i + 1 < args.len() => {
                player_uid = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Args {
        cfg,
        session_name,
        player_uid,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    info!(server = %args.cfg.server_addr, session = %args.session_name, "Starting client");

    let mut client = GameClient::connect(&args.cfg, &args.session_name, &args.player_uid)
        .await
        .context("connect")?;

    let tick_interval = Duration::from_secs_f32(1.0 / args.cfg.sim_hz as f32);
    // Clockwise patrol, one direction per second.
    let patrol = [
        InputState { right: true, ..Default::default() },
        InputState { down: true, ..Default::default() },
        InputState { left: true, ..Default::default() },
        InputState { up: true, ..Default::default() },
    ];
    let mut tick: u64 = 0;

    loop {
        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        let phase = (tick / args.cfg.sim_hz.max(1) as u64) as usize % patrol.len();
        client.send_input(patrol[phase]).await?;
        client.pump(Duration::from_millis(5)).await?;

        if tick % 60 == 0 {
            if let Some((id, view)) = client.replica.entity_for_owner(client.connection_id.0) {
                info!(
                    entity = id,
                    cell_x = view.cell_x,
                    cell_y = view.cell_y,
                    version = client.replica.last_applied_version(),
                    "Local pawn"
                );
            }
        }

        tick += 1;
        tokio::time::sleep(tick_interval).await;
    }

    Ok(())
}
