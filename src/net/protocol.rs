use serde::{Deserialize, Serialize};

use crate::game::constants::leaderboard;
use crate::game::pellet::{Pellet, PelletId};
use crate::game::rng::MapType;
use crate::game::snake::{Snake, SnakeId};
use crate::game::state::{EntropyMode, GameState};
use crate::game::systems::leaderboard::{self as ranking, LeaderboardEntry};
use crate::util::Vec2;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Spawn a snake, replacing any earlier snake of this connection or identity
    Join {
        name: String,
        identity: Option<String>,
    },
    /// Steer toward `target_angle` (radians)
    Input { target_angle: f32 },
    /// Ping for latency measurement
    Ping { timestamp: u64 },
    /// Cash out the current snake's score
    TapOut { match_id: String },
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join queued; the snake appears in the next state message
    JoinAccepted { your_id: SnakeId, match_id: String },
    JoinRejected { reason: String },
    /// Full world state
    State(GameSnapshot),
    /// Changes since the last state this client received
    Delta(DeltaState),
    /// Your snake died this tick
    Dead { final_score: u32 },
    Pong { timestamp: u64 },
    TapOutSuccess { amount_withdrawn: u32 },
    TapOutRejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnakeSnapshot {
    pub id: SnakeId,
    pub name: String,
    pub identity: Option<String>,
    pub head: Vec2,
    pub angle: f32,
    pub segments: Vec<Vec2>,
    pub color: String,
    /// Whole tokens, for display
    pub tokens: f64,
}

impl From<&Snake> for SnakeSnapshot {
    fn from(snake: &Snake) -> Self {
        Self {
            id: snake.id,
            name: snake.name.clone(),
            identity: snake.identity.clone(),
            head: snake.head,
            angle: snake.angle,
            segments: snake.segments.clone(),
            color: snake.color.clone(),
            tokens: snake.pellet_tokens.as_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PelletSnapshot {
    pub id: PelletId,
    pub position: Vec2,
    pub size: f32,
    pub color: String,
    pub tokens: f64,
}

impl From<&Pellet> for PelletSnapshot {
    fn from(pellet: &Pellet) -> Self {
        Self {
            id: pellet.id,
            position: pellet.position,
            size: pellet.size,
            color: pellet.color.to_string(),
            tokens: pellet.tokens.as_f64(),
        }
    }
}

/// Immutable point-in-time world state produced at the end of a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub tick: u64,
    pub match_id: String,
    /// Alive snakes only, in id order
    pub snakes: Vec<SnakeSnapshot>,
    pub pellets: Vec<PelletSnapshot>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub seed_pending: bool,
    pub seed_fallback: bool,
    pub map_type: Option<MapType>,
    /// Hex seed, once known
    pub seed: Option<String>,
    /// Changes whenever the pellet field is replaced
    pub field_epoch: u32,
}

impl GameSnapshot {
    pub fn from_game_state(state: &GameState) -> Self {
        let entropy = state.entropy_mode();
        Self {
            tick: state.tick,
            match_id: state.match_id.clone(),
            snakes: state.alive_snakes().map(SnakeSnapshot::from).collect(),
            pellets: state.pellets.iter().map(PelletSnapshot::from).collect(),
            leaderboard: ranking::compute(state.alive_snakes(), leaderboard::SIZE),
            seed_pending: entropy == EntropyMode::Pending,
            seed_fallback: entropy == EntropyMode::Fallback,
            map_type: state.map_type(),
            seed: state.seed().map(|s| s.to_hex()),
            field_epoch: state.field_epoch(),
        }
    }

    pub fn snake(&self, id: SnakeId) -> Option<&SnakeSnapshot> {
        self.snakes.iter().find(|s| s.id == id)
    }

    pub fn has_pellet(&self, id: PelletId) -> bool {
        self.pellets.iter().any(|p| p.id == id)
    }
}

/// Minimal change-set. Session-immutable fields (seed, map variant) are
/// only ever carried by full snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaState {
    pub tick: u64,
    pub match_id: String,
    pub snakes_added: Vec<SnakeSnapshot>,
    pub snakes_updated: Vec<SnakeSnapshot>,
    pub snakes_removed: Vec<SnakeId>,
    pub pellets_removed: Vec<PelletId>,
    /// Present only when it changed
    pub leaderboard: Option<Vec<LeaderboardEntry>>,
    pub seed_pending: bool,
    pub seed_fallback: bool,
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers (compatible with the browser client)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
