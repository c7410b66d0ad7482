use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::error::TrySendError;

use crate::net::commands::{ConnectionId, Outbound};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, no snake yet
    Connecting,
    /// Has joined and controls a snake
    Playing,
    /// Tearing down its snake
    Disconnecting,
    /// Writer gone or closed
    Disconnected,
}

/// Why a frame did not reach the writer task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Writer is behind by a full queue
    Lagging,
    Closed,
}

/// Session-side view of one client connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub state: ConnectionState,
    outbound: Outbound,
    pub created_at: Instant,
    pub bytes_sent: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: Outbound) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            outbound,
            created_at: Instant::now(),
            bytes_sent: 0,
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// Queue a frame without blocking the tick
    pub fn send(&mut self, frame: Arc<[u8]>) -> Result<(), SendFailure> {
        let len = frame.len();
        match self.outbound.try_send(frame) {
            Ok(()) => {
                self.bytes_sent += len as u64;
                self.frames_sent += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.frames_dropped += 1;
                Err(SendFailure::Lagging)
            }
            Err(TrySendError::Closed(_)) => {
                self.state = ConnectionState::Disconnected;
                Err(SendFailure::Closed)
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == ConnectionState::Playing
    }

    pub fn mark_playing(&mut self) {
        self.state = ConnectionState::Playing;
    }

    /// Start disconnection
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnecting;
    }
}
