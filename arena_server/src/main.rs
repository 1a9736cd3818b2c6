//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--addr 127.0.0.1:41000] [--sim-hz 60] [--maps-dir maps]
//!
//! The server accepts client connections, runs every session at a fixed
//! timestep, and replicates dirty entity state over UDP.

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use arena_server::GameServer;
use arena_shared::config::ArenaConfig;
use tracing::info;

fn parse_args() -> ArenaConfig {
    let mut cfg = ArenaConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--sim-hz" if i + 1 < args.len() => {
                cfg.sim_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--maps-dir" if i + 1 < args.len() => {
                cfg.maps_dir = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, sim_hz = cfg.sim_hz, maps_dir = %cfg.maps_dir, "Starting server");

    let mut server = GameServer::new(cfg.clone(), PathBuf::from(&cfg.maps_dir))
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let tick_interval = std::time::Duration::from_secs_f32(1.0 / cfg.sim_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        if let Ok(Some(cid)) = server.try_accept(std::time::Duration::from_millis(1)).await {
            info!(connection_id = ?cid, "New client accepted");
        }

        server.step(tick_interval.as_secs_f32()).await?;

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
