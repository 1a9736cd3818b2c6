//! Server implementation.
//!
//! An authoritative fixed-timestep server. Each tick:
//! - drains client-authored commands from the UDP socket,
//! - advances every session's simulation,
//! - sweeps dirty entities into versioned `UpdateEntity` batches.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Avoid wall-clock-dependent branching in gameplay code.
//! - Sessions iterate in stable (sorted) order.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use arena_shared::{
    config::ArenaConfig,
    grid::MapConfig,
    net::{ConnectionId, NetMsg, ReliableConn, ReliableListener, PROTOCOL_VERSION},
    protocol::Command,
};

use crate::session::{CommandSink, PlayerSeat, SessionManager};

/// Upper bound on the whole post-accept handshake. A client that connects
/// and then goes silent must not stall the tick loop.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Fans command batches out over UDP, one `NetMsg::Game` datagram per
/// command. Fire-and-forget: delivery failures are logged, never retried.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    peers: HashMap<u64, SocketAddr>,
}

impl UdpSink {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            peers: HashMap::new(),
        }
    }

    pub fn register_peer(&mut self, connection_id: u64, addr: SocketAddr) {
        self.peers.insert(connection_id, addr);
    }

    pub fn unregister_peer(&mut self, connection_id: u64) {
        self.peers.remove(&connection_id);
    }
}

#[async_trait]
impl CommandSink for UdpSink {
    async fn send(&mut self, targets: &[u64], commands: &[Command]) {
        for command in commands {
            let msg = NetMsg::Game(command.clone());
            let payload = match serde_json::to_vec(&msg) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize command");
                    continue;
                }
            };
            for target in targets {
                if let Some(addr) = self.peers.get(target) {
                    let _ = self.socket.send_to(&payload, addr).await;
                }
            }
        }
    }
}

/// Connected client state.
struct ClientState {
    _reliable: ReliableConn,
    udp_peer: SocketAddr,
    session_name: String,
    session_uid: String,
}

/// Authoritative arena server.
pub struct GameServer {
    pub cfg: ArenaConfig,
    manager: SessionManager,
    sink: UdpSink,
    clients: HashMap<ConnectionId, ClientState>,
    peer_to_conn: HashMap<SocketAddr, ConnectionId>,

    tcp: ReliableListener,
    udp: Arc<UdpSocket>,

    tick: u64,
    next_session_seq: u64,
}

impl GameServer {
    /// Binds sockets and prepares the session manager.
    pub async fn new(cfg: ArenaConfig, maps_dir: PathBuf) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = Arc::new(UdpSocket::bind(addr).await.context("udp bind")?);

        Ok(Self {
            manager: SessionManager::new(maps_dir, cfg.move_speed),
            sink: UdpSink::new(Arc::clone(&udp)),
            clients: HashMap::new(),
            peer_to_conn: HashMap::new(),
            tcp,
            udp,
            tick: 0,
            next_session_seq: 1,
            cfg,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn session_count(&self) -> usize {
        self.manager.session_count()
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Accepts a client within the timeout, running the full handshake + join
    /// flow. Returns `None` when nobody connects, and also when a connecting
    /// client fails or stalls the handshake; the tick loop keeps running
    /// either way.
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ConnectionId>> {
        let (conn, peer) = match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(None),
        };
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handle_new_connection(conn, peer)).await
        {
            Ok(Ok(id)) => Ok(Some(id)),
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "Handshake failed");
                Ok(None)
            }
            Err(_) => {
                warn!(%peer, "Handshake timed out");
                Ok(None)
            }
        }
    }

    /// Handshake: Hello → UdpHello → Join, answered with Welcome and
    /// JoinAccepted. The joiner's snapshot goes out over UDP right away.
    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ConnectionId> {
        let msg = conn.recv().await?;
        match msg {
            NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {}
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }

        let udp_hello = conn.recv().await?;
        let client_udp_port = match udp_hello {
            NetMsg::UdpHello { client_udp_port } => client_udp_port,
            other => anyhow::bail!("expected UdpHello, got {other:?}"),
        };

        let id = ConnectionId::new_unique();
        conn.send(&NetMsg::Welcome { connection_id: id }).await?;

        let join = conn.recv().await?;
        let (session_name, player_name, player_uid) = match join {
            NetMsg::Join {
                session_name,
                player_name,
                player_uid,
            } => (session_name, player_name, player_uid),
            other => anyhow::bail!("expected Join, got {other:?}"),
        };

        let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
        self.sink.register_peer(id.0, udp_peer);
        self.peer_to_conn.insert(udp_peer, id);

        let seat = PlayerSeat {
            connection_id: id.0,
            player_name,
            player_uid,
        };
        let session_uid = self.join_session(&session_name, seat).await?;

        conn.send(&NetMsg::JoinAccepted {
            session_uid: session_uid.clone(),
        })
        .await?;

        info!(connection_id = ?id, %udp_peer, session_name, "Client connected");

        self.clients.insert(
            id,
            ClientState {
                _reliable: conn,
                udp_peer,
                session_name,
                session_uid,
            },
        );
        Ok(id)
    }

    /// Joins an existing session or creates one named after the request.
    async fn join_session(&mut self, session_name: &str, seat: PlayerSeat) -> anyhow::Result<String> {
        if let Some(instance) = self.manager.instance(session_name) {
            let session_uid = instance.session_uid.clone();
            self.manager
                .add_player_to_session(session_name, seat, &mut self.sink)
                .await
                .context("join session")?;
            return Ok(session_uid);
        }

        let session_uid = format!("{session_name}#{:04}", self.next_session_seq);
        self.next_session_seq += 1;

        let map_config = MapConfig {
            map_name: session_name.to_string(),
            grid_width: 16,
            grid_height: 16,
            cell_size: 1.0,
            ..Default::default()
        };

        let created = self
            .manager
            .create_session(session_name, &session_uid, map_config, &[seat], &mut self.sink)
            .await;
        anyhow::ensure!(created, "failed to create session {session_name}");
        Ok(session_uid)
    }

    /// Drops a client and removes their entity from their session.
    pub async fn disconnect(&mut self, connection_id: ConnectionId) {
        let Some(client) = self.clients.remove(&connection_id) else {
            return;
        };
        self.peer_to_conn.remove(&client.udp_peer);
        self.sink.unregister_peer(connection_id.0);
        self.manager
            .remove_player_from_session(&client.session_name, connection_id.0, &mut self.sink)
            .await;
        info!(connection_id = ?connection_id, "Client disconnected");
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.recv_commands().await?;
        self.manager.step_all(dt_sec);

        let interval = (self.cfg.sim_hz / self.cfg.replication_hz.max(1)).max(1) as u64;
        if self.tick % interval == 0 {
            self.manager.replicate_dirty(&mut self.sink).await;
        }
        self.tick += 1;
        Ok(())
    }

    /// Runs the server for a number of ticks (test/soak helper).
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.sim_hz as f32);
        let mut next = tokio::time::Instant::now();
        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    async fn recv_commands(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Ok(msg) = serde_json::from_slice::<NetMsg>(&buf[..n]) {
                        self.handle_udp_message(from, msg).await;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(anyhow::Error::new(e).context("udp recv")),
            }
        }
        Ok(())
    }

    async fn handle_udp_message(&mut self, from: SocketAddr, msg: NetMsg) {
        let Some(&connection_id) = self.peer_to_conn.get(&from) else {
            debug!(%from, "Datagram from unknown peer");
            return;
        };

        match msg {
            NetMsg::Game(command) => {
                // A client can only speak for its own session.
                if let Some(client) = self.clients.get(&connection_id) {
                    if client.session_uid != command.session_uid.as_str() {
                        debug!(connection_id = ?connection_id, "Command for foreign session dropped");
                        return;
                    }
                }
                self.manager
                    .handle_command(connection_id.0, &command, &mut self.sink)
                    .await;
            }
            NetMsg::Disconnect { reason } => {
                debug!(connection_id = ?connection_id, reason, "Client requested disconnect");
                self.disconnect(connection_id).await;
            }
            other => {
                debug!(?other, "Unexpected UDP message");
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(sim_hz: u32) -> anyhow::Result<(GameServer, ArenaConfig)> {
    let mut cfg = ArenaConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        sim_hz,
        ..Default::default()
    };

    // Bind TCP first to learn the ephemeral port, then bind UDP to match.
    let tcp = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    let addr = tcp.local_addr()?;
    cfg.server_addr = addr.to_string();

    let udp_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    let udp = Arc::new(UdpSocket::bind(udp_bind).await?);

    let server = GameServer {
        manager: SessionManager::new(PathBuf::from(&cfg.maps_dir), cfg.move_speed),
        sink: UdpSink::new(Arc::clone(&udp)),
        clients: HashMap::new(),
        peer_to_conn: HashMap::new(),
        tcp,
        udp,
        tick: 0,
        next_session_seq: 1,
        cfg: cfg.clone(),
    };

    Ok((server, cfg))
}
