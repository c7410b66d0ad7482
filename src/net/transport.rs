//! WebTransport server implementation
//!
//! Each session opens one bidirectional stream. The reader half decodes
//! client messages and turns them into session commands; the writer half
//! drains that connection's outbound queue. Connection tasks never touch the
//! simulation directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::game::constants::{network, snake};
use crate::metrics::Metrics;
use crate::net::commands::{CommandError, CommandSender, ConnectionId, SessionCommand};
use crate::net::framing::{read_message, write_message, FramingError};
use crate::net::protocol::{decode, encode, ClientMessage, ServerMessage};
use crate::net::tls::TlsConfig;

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    commands: CommandSender,
    metrics: Arc<Metrics>,
    next_conn_id: AtomicU64,
}

impl WebTransportServer {
    pub fn new(
        config: ServerConfig,
        tls_config: TlsConfig,
        commands: CommandSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            tls_config,
            commands,
            metrics,
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Accept sessions until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;

        let bind_addr = self.bind_addr();
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_address(bind_addr)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;
        tracing::info!("WebTransport server listening on {}", bind_addr);

        loop {
            let incoming = server.accept().await;
            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            let commands = self.commands.clone();
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, conn_id, commands, metrics).await {
                    tracing::warn!("Connection {} error: {}", conn_id, e);
                }
            });
        }
    }
}

/// Handle a single WebTransport session
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    conn_id: ConnectionId,
    commands: CommandSender,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    tracing::debug!(
        "New session from {:?}, path: {}, conn_id: {}",
        session_request.authority(),
        session_request.path(),
        conn_id
    );

    let connection = session_request.accept().await?;
    let (mut send, mut recv) = connection.accept_bi().await?;

    let (outbound, mut frames) = mpsc::channel::<Arc<[u8]>>(network::OUTBOUND_QUEUE_DEPTH);
    commands.send(SessionCommand::Connect {
        conn_id,
        outbound: outbound.clone(),
    })?;

    // Writer: single owner of the send stream
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = write_message(&mut send, &frame, network::MAX_SERVER_MESSAGE_SIZE).await {
                tracing::debug!("Connection {} write failed: {}", conn_id, e);
                break;
            }
        }
    });

    loop {
        let payload = match read_message(&mut recv, network::MAX_CLIENT_MESSAGE_SIZE).await {
            Ok(payload) => payload,
            Err(FramingError::ConnectionClosed) => break,
            Err(FramingError::MessageTooLarge(len, max)) => {
                tracing::warn!("Connection {} sent oversized frame: {} bytes (max {})", conn_id, len, max);
                break;
            }
            Err(e) => {
                tracing::debug!("Connection {} read error: {}", conn_id, e);
                break;
            }
        };
        metrics.record_received(payload.len());

        let message: ClientMessage = match decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Connection {}: {}", conn_id, e);
                continue;
            }
        };

        match message {
            ClientMessage::Join { name, identity } => {
                let name = sanitize_name(&name);
                match normalize_identity(identity.as_deref()) {
                    Ok(identity) => {
                        tracing::debug!("Join from '{}' on connection {}", name, conn_id);
                        commands.send(SessionCommand::Join {
                            conn_id,
                            name,
                            identity,
                        })?;
                    }
                    Err(reason) => {
                        tracing::warn!("Rejecting join on connection {}: {}", conn_id, reason);
                        reply(
                            &outbound,
                            &ServerMessage::JoinRejected {
                                reason: reason.to_string(),
                            },
                        );
                    }
                }
            }

            ClientMessage::Input { target_angle } => {
                if !target_angle.is_finite() {
                    continue;
                }
                match commands.try_send_input(conn_id, target_angle) {
                    Ok(()) => {}
                    Err(CommandError::Full) => {
                        tracing::debug!("Input lane full, dropping steer from {}", conn_id);
                    }
                    Err(CommandError::Disconnected) => break,
                }
            }

            ClientMessage::Ping { timestamp } => {
                reply(&outbound, &ServerMessage::Pong { timestamp });
            }

            ClientMessage::TapOut { match_id } => {
                commands.send(SessionCommand::TapOut { conn_id, match_id })?;
            }
        }
    }

    // The session drops its sender on disconnect; ours goes here, which
    // lets the writer drain and stop
    drop(outbound);
    commands.send(SessionCommand::Disconnect { conn_id })?;
    if let Err(e) = writer.await {
        tracing::debug!("Connection {} writer ended abnormally: {}", conn_id, e);
    }

    tracing::debug!("Connection closed (conn_id: {})", conn_id);
    Ok(())
}

/// Immediate reply on the connection's own queue
fn reply(outbound: &mpsc::Sender<Arc<[u8]>>, message: &ServerMessage) {
    match encode(message) {
        Ok(bytes) => {
            if outbound.try_send(Arc::from(bytes)).is_err() {
                tracing::debug!("Reply dropped, outbound queue full");
            }
        }
        Err(e) => tracing::warn!("Failed to encode reply: {}", e),
    }
}

/// Trim, strip control and markup characters, collapse whitespace and clamp
/// to the display limit. Empty names become the default.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| *c != '<' && *c != '>' && *c != '&')
        .collect();

    let collapsed: String = cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(snake::MAX_NAME_LENGTH)
        .collect();

    let collapsed = collapsed.trim_end().to_string();
    if collapsed.is_empty() {
        snake::DEFAULT_NAME.to_string()
    } else {
        collapsed
    }
}

/// Identities are compared case-insensitively, so they are stored
/// lowercased. Blank means anonymous.
pub fn normalize_identity(raw: Option<&str>) -> Result<Option<String>, &'static str> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if raw.len() > snake::MAX_IDENTITY_LENGTH {
        return Err("Identity too long");
    }
    if !raw.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Invalid identity");
    }
    Ok(Some(raw.to_lowercase()))
}
