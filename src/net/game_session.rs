//! Game session - runs the tick loop and pushes state to subscribers
//!
//! `GameSession` is built once in `main` and moved into the tick task. It is
//! the only owner of the simulation; connection tasks talk to it through
//! [`CommandSender`] lanes that are drained at the start of every tick.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::game::constants::network;
use crate::game::game_loop::{GameEvent, GameLoop, JoinRequest, RetireReason, TickOutcome};
use crate::game::state::SeedApplyError;
use crate::metrics::Metrics;
use crate::net::commands::{CommandBuffer, CommandSender, ConnectionId, InputCommand, Outbound, SessionCommand};
use crate::net::connection::{Connection, ConnectionState, SendFailure};
use crate::net::delta::{DeltaCompressor, SyncUpdate};
use crate::net::protocol::{encode, ServerMessage};

pub struct GameSession {
    game: GameLoop,
    connections: HashMap<ConnectionId, Connection>,
    compressor: DeltaCompressor,
    commands: CommandBuffer,
    metrics: Arc<Metrics>,
    max_connections: usize,
}

impl GameSession {
    pub fn new(game: GameLoop, metrics: Arc<Metrics>, max_connections: usize) -> Self {
        metrics.record_entropy_mode(game.state().entropy_mode());
        Self {
            game,
            connections: HashMap::new(),
            compressor: DeltaCompressor::new(),
            commands: CommandBuffer::default(),
            metrics,
            max_connections,
        }
    }

    /// Handle for connection and entropy tasks
    pub fn commands(&self) -> CommandSender {
        self.commands.sender()
    }

    pub fn game(&self) -> &GameLoop {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut GameLoop {
        &mut self.game
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drain commands, advance one tick by wall-clock time, then broadcast
    pub fn run_tick(&mut self) -> TickOutcome {
        let started = std::time::Instant::now();
        self.process_commands();
        let outcome = self.game.tick();
        self.publish(&outcome);
        self.metrics.record_tick_time(started.elapsed());
        outcome
    }

    /// Same as [`run_tick`](Self::run_tick) with an explicit step
    pub fn run_tick_with_dt(&mut self, dt: f32) -> TickOutcome {
        self.process_commands();
        let outcome = self.game.tick_with_dt(dt);
        self.publish(&outcome);
        outcome
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn process_commands(&mut self) {
        for command in self.commands.drain_control() {
            self.handle_control(command);
        }
        for InputCommand { conn_id, target_angle } in self.commands.drain_inputs() {
            self.game.set_heading(conn_id, target_angle);
        }
    }

    fn handle_control(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { conn_id, outbound } => self.connect(conn_id, outbound),
            SessionCommand::Join {
                conn_id,
                name,
                identity,
            } => self.join(conn_id, name, identity),
            SessionCommand::TapOut { conn_id, match_id } => self.tap_out(conn_id, &match_id),
            SessionCommand::Disconnect { conn_id } => self.disconnect(conn_id),
            SessionCommand::SeedDelivered(seed) => {
                match self.game.apply_seed(seed) {
                    Ok(_) => {}
                    Err(SeedApplyError::AlreadySeeded) => {
                        warn!("Ignoring second seed delivery {:?}", seed);
                    }
                }
                self.metrics.record_entropy_mode(self.game.state().entropy_mode());
            }
            SessionCommand::EntropyUnavailable => {
                self.game.enter_fallback();
                warn!(
                    "No seed for match {}, running with local randomness",
                    self.game.state().match_id
                );
                self.metrics.record_entropy_mode(self.game.state().entropy_mode());
            }
        }
    }

    fn connect(&mut self, conn_id: ConnectionId, outbound: Outbound) {
        let mut conn = Connection::new(conn_id, outbound);
        if self.connections.len() >= self.max_connections {
            warn!("Rejecting connection {}: {} connections open", conn_id, self.connections.len());
            send_message(
                &mut conn,
                &ServerMessage::JoinRejected {
                    reason: "Server full".to_string(),
                },
            );
            return;
        }
        debug!("Connection {} registered", conn_id);
        self.connections.insert(conn_id, conn);
    }

    fn join(&mut self, conn_id: ConnectionId, name: String, identity: Option<String>) {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            debug!("Join from unknown connection {}", conn_id);
            return;
        };

        info!("Queueing join for '{}' on connection {}", name, conn_id);
        self.game.queue_join(JoinRequest {
            id: conn_id,
            name,
            identity,
        });
        conn.mark_playing();
        send_message(
            conn,
            &ServerMessage::JoinAccepted {
                your_id: conn_id,
                match_id: self.game.state().match_id.clone(),
            },
        );
        // The next state this subscriber sees is a full one
        self.compressor.forget(conn_id);
    }

    fn tap_out(&mut self, conn_id: ConnectionId, match_id: &str) {
        let Some(conn) = self.connections.get_mut(&conn_id) else {
            return;
        };

        let reply = if match_id != self.game.state().match_id {
            ServerMessage::TapOutRejected {
                reason: "Not in this match".to_string(),
            }
        } else {
            match self.game.retire(conn_id, RetireReason::TapOut) {
                Some(summary) => {
                    info!(
                        "Connection {} tapped out with score {} and {} tokens",
                        conn_id, summary.score, summary.tokens
                    );
                    conn.state = ConnectionState::Connecting;
                    ServerMessage::TapOutSuccess {
                        amount_withdrawn: summary.score,
                    }
                }
                None => ServerMessage::TapOutRejected {
                    reason: "No active snake".to_string(),
                },
            }
        };
        send_message(conn, &reply);
    }

    fn disconnect(&mut self, conn_id: ConnectionId) {
        if let Some(mut conn) = self.connections.remove(&conn_id) {
            conn.disconnect();
            debug!(
                "Connection {} closed after {:?}, {} frames sent, {} dropped",
                conn_id,
                conn.created_at.elapsed(),
                conn.frames_sent,
                conn.frames_dropped
            );
        }
        self.compressor.forget(conn_id);
        self.game.retire(conn_id, RetireReason::Disconnect);
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    fn publish(&mut self, outcome: &TickOutcome) {
        self.broadcast(outcome);

        for event in &outcome.events {
            match event {
                GameEvent::Died { id, score, .. } => {
                    self.metrics.deaths_total.fetch_add(1, Ordering::Relaxed);
                    if let Some(conn) = self.connections.get_mut(id) {
                        send_message(conn, &ServerMessage::Dead { final_score: *score });
                        conn.state = ConnectionState::Connecting;
                    }
                }
                GameEvent::PelletEaten { .. } => {
                    self.metrics.pellets_eaten_total.fetch_add(1, Ordering::Relaxed);
                }
                GameEvent::Joined { id, evicted } => {
                    for stale in evicted.iter().filter(|stale| *stale != id) {
                        // Same identity joined from another connection
                        if let Some(conn) = self.connections.get_mut(stale) {
                            info!("Snake {} replaced by {} (same identity)", stale, id);
                            conn.state = ConnectionState::Connecting;
                        }
                    }
                }
                GameEvent::Removed { .. } | GameEvent::TokensDistributed { .. } => {}
            }
        }

        let state = self.game.state();
        self.metrics
            .snakes_total
            .store(state.snakes.len() as u64, Ordering::Relaxed);
        self.metrics
            .snakes_alive
            .store(state.alive_count() as u64, Ordering::Relaxed);
        self.metrics
            .pellets_remaining
            .store(state.pellets.len() as u64, Ordering::Relaxed);
        self.metrics
            .connections_active
            .store(self.connections.len() as u64, Ordering::Relaxed);
    }

    /// Full snapshots are encoded at most once per tick and shared
    fn broadcast(&mut self, outcome: &TickOutcome) {
        let mut full_frame: Option<Arc<[u8]>> = None;
        let mut failed = Vec::new();

        for (id, conn) in self.connections.iter_mut() {
            if matches!(
                conn.state,
                ConnectionState::Disconnecting | ConnectionState::Disconnected
            ) {
                continue;
            }

            let (frame, full) = match self.compressor.update(*id, &outcome.snapshot) {
                SyncUpdate::Full => {
                    if full_frame.is_none() {
                        full_frame = encode_frame(&ServerMessage::State((*outcome.snapshot).clone()));
                    }
                    (full_frame.clone(), true)
                }
                SyncUpdate::Delta(delta) => (encode_frame(&ServerMessage::Delta(delta)), false),
            };
            let Some(frame) = frame else {
                failed.push(*id);
                continue;
            };

            let len = frame.len();
            match conn.send(frame) {
                Ok(()) => self.metrics.record_sent(len, full),
                Err(failure) => {
                    if failure == SendFailure::Lagging {
                        self.metrics.outbound_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!("State for connection {} not queued: {:?}", id, failure);
                    failed.push(*id);
                }
            }
        }

        for id in failed {
            self.compressor.forget(id);
        }
    }
}

fn encode_frame(message: &ServerMessage) -> Option<Arc<[u8]>> {
    match encode(message) {
        Ok(bytes) if bytes.len() <= network::MAX_SERVER_MESSAGE_SIZE => Some(Arc::from(bytes)),
        Ok(bytes) => {
            warn!("Dropping oversized frame: {} bytes", bytes.len());
            None
        }
        Err(e) => {
            warn!("Failed to encode message: {}", e);
            None
        }
    }
}

fn send_message(conn: &mut Connection, message: &ServerMessage) {
    if let Some(frame) = encode_frame(message) {
        if let Err(failure) = conn.send(frame) {
            debug!("Message for connection {} not queued: {:?}", conn.id, failure);
        }
    }
}

/// Start the tick loop background task. The task owns the session.
pub fn start_game_loop(mut session: GameSession, tick_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let ticks_per_report = (Duration::from_secs(30).as_millis() / tick_interval.as_millis().max(1)) as u64;
        info!("Game loop started, tick every {:?}", tick_interval);
        let start = Instant::now();

        loop {
            ticker.tick().await;
            let outcome = session.run_tick();

            if ticks_per_report > 0 && outcome.tick % ticks_per_report == 0 {
                let state = session.game().state();
                info!(
                    "Game: {}s, tick {}, {} snakes ({} alive), {} pellets, {} connections, entropy {:?}",
                    start.elapsed().as_secs(),
                    outcome.tick,
                    state.snakes.len(),
                    state.alive_count(),
                    state.pellets.len(),
                    session.connection_count(),
                    state.entropy_mode()
                );
            }
        }
    })
}
