//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (handshake + join)
//! - An unreliable datagram socket (commands in both directions)
//! - A [`ClientReplica`] mirroring the session
//!
//! Lost or reordered datagrams surface as version gaps in the replica; the
//! pump answers them with a `ResyncRequest` automatically.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use arena_shared::{
    config::ArenaConfig,
    net::{ConnectionId, NetMsg, ReliableConn, UnreliableConn, PROTOCOL_VERSION},
    protocol::Command,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{
    input::{build_move_command, InputState},
    replica::{ApplyOutcome, ClientReplica},
};

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// Joined a session; replica may still be waiting for its snapshot.
    Joined,
}

/// High-level game client.
pub struct GameClient {
    pub connection_id: ConnectionId,
    pub state: ClientState,
    pub replica: ClientReplica,

    reliable: ReliableConn,
    unreliable: UnreliableConn,
}

impl GameClient {
    /// Connects, performs the handshake, and joins the named session.
    pub async fn connect(cfg: &ArenaConfig, session_name: &str, player_uid: &str) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, session_name, "Connecting to server");

        // Bind UDP first so we can tell the server where to send commands.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let unreliable = UnreliableConn::connect(bind, server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let welcome = reliable.recv().await?;
        let connection_id = match welcome {
            NetMsg::Welcome { connection_id } => connection_id,
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        reliable
            .send(&NetMsg::Join {
                session_name: session_name.to_string(),
                player_name: cfg.player_name.clone(),
                player_uid: player_uid.to_string(),
            })
            .await?;

        let accepted = reliable.recv().await?;
        let session_uid = match accepted {
            NetMsg::JoinAccepted { session_uid } => session_uid,
            other => anyhow::bail!("expected JoinAccepted, got {other:?}"),
        };

        info!(connection_id = ?connection_id, session_uid, "Joined session");

        Ok(Self {
            connection_id,
            state: ClientState::Joined,
            replica: ClientReplica::new(&session_uid),
            reliable,
            unreliable,
        })
    }

    /// Samples input and sends the `MoveInput` for the local pawn, if the
    /// replica already knows it.
    pub async fn send_input(&mut self, input: InputState) -> anyhow::Result<()> {
        if let Some(cmd) = build_move_command(&self.replica, self.connection_id.0, input) {
            self.unreliable.send(&NetMsg::Game(cmd)).await?;
        }
        Ok(())
    }

    /// Drains pending datagrams into the replica, answering version gaps
    /// with a resync request. Returns the number of commands applied.
    pub async fn pump(&mut self, budget: std::time::Duration) -> anyhow::Result<usize> {
        let mut applied = 0;
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.unreliable.recv_timeout(remaining).await? {
                Some(NetMsg::Game(cmd)) => {
                    if self.apply(&cmd).await? {
                        applied += 1;
                    }
                }
                Some(NetMsg::Disconnect { reason }) => {
                    info!(reason, "Disconnected by server");
                    self.state = ClientState::Disconnected;
                    break;
                }
                Some(other) => {
                    debug!(?other, "Unexpected UDP message");
                }
                None => break,
            }
        }
        Ok(applied)
    }

    /// Applies one command; returns whether the replica changed.
    async fn apply(&mut self, cmd: &Command) -> anyhow::Result<bool> {
        match self.replica.apply(cmd) {
            ApplyOutcome::Applied => Ok(true),
            ApplyOutcome::Ignored => Ok(false),
            ApplyOutcome::NeedsResync(reason) => {
                warn!(reason, version = cmd.version, "Replica out of sync, requesting resync");
                self.request_resync().await?;
                Ok(false)
            }
        }
    }

    /// Asks the server for a fresh full snapshot.
    pub async fn request_resync(&mut self) -> anyhow::Result<()> {
        let cmd = Command::resync_request(self.replica.session_uid());
        self.unreliable.send(&NetMsg::Game(cmd)).await?;
        Ok(())
    }

    /// Announces a clean disconnect.
    pub async fn disconnect(&mut self, reason: &str) -> anyhow::Result<()> {
        self.unreliable
            .send(&NetMsg::Disconnect {
                reason: reason.to_string(),
            })
            .await?;
        self.state = ClientState::Disconnected;
        Ok(())
    }

    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.reliable.peer_addr()
    }
}
