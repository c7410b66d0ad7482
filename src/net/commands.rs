//! Lock-free command lanes from connection tasks to the session
//!
//! Uses crossbeam-channel for MPSC communication. Control commands (joins,
//! tap-outs, disconnects, entropy results) travel on an unbounded lane and
//! are never dropped; steering inputs use a bounded lane and are shed under
//! backpressure. The session drains both at the start of each tick, control
//! first.

use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use crate::game::constants::network;
use crate::game::rng::Seed;

/// Connection ids double as snake ids
pub type ConnectionId = u64;

/// Encoded frames queued for one connection's writer task
pub type Outbound = tokio::sync::mpsc::Sender<Arc<[u8]>>;

#[derive(Debug)]
pub enum SessionCommand {
    Connect {
        conn_id: ConnectionId,
        outbound: Outbound,
    },
    Join {
        conn_id: ConnectionId,
        name: String,
        identity: Option<String>,
    },
    TapOut {
        conn_id: ConnectionId,
        match_id: String,
    },
    Disconnect {
        conn_id: ConnectionId,
    },
    SeedDelivered(Seed),
    EntropyUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputCommand {
    pub conn_id: ConnectionId,
    pub target_angle: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// Input lane is full (backpressure)
    #[error("input queue full")]
    Full,
    /// Session loop has stopped
    #[error("session stopped")]
    Disconnected,
}

pub struct CommandBuffer {
    control_tx: Sender<SessionCommand>,
    control_rx: Receiver<SessionCommand>,
    input_tx: Sender<InputCommand>,
    input_rx: Receiver<InputCommand>,
}

impl CommandBuffer {
    pub fn new(input_capacity: usize) -> Self {
        let (control_tx, control_rx) = unbounded();
        let (input_tx, input_rx) = bounded(input_capacity);
        Self {
            control_tx,
            control_rx,
            input_tx,
            input_rx,
        }
    }

    /// Each connection task holds its own sender clone
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            control: self.control_tx.clone(),
            input: self.input_tx.clone(),
        }
    }

    pub fn drain_control(&self) -> Vec<SessionCommand> {
        self.control_rx.try_iter().collect()
    }

    pub fn drain_inputs(&self) -> Vec<InputCommand> {
        self.input_rx.try_iter().collect()
    }

    #[inline]
    pub fn pending_inputs(&self) -> usize {
        self.input_rx.len()
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new(network::INPUT_QUEUE_CAPACITY)
    }
}

#[derive(Clone)]
pub struct CommandSender {
    control: Sender<SessionCommand>,
    input: Sender<InputCommand>,
}

impl CommandSender {
    pub fn send(&self, command: SessionCommand) -> Result<(), CommandError> {
        self.control
            .send(command)
            .map_err(|_| CommandError::Disconnected)
    }

    /// Non-blocking; fails with `Full` under backpressure
    #[inline]
    pub fn try_send_input(&self, conn_id: ConnectionId, target_angle: f32) -> Result<(), CommandError> {
        self.input
            .try_send(InputCommand { conn_id, target_angle })
            .map_err(|e| match e {
                TrySendError::Full(_) => CommandError::Full,
                TrySendError::Disconnected(_) => CommandError::Disconnected,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_and_input_lanes() {
        let buffer = CommandBuffer::new(10);
        let sender = buffer.sender();

        sender.send(SessionCommand::Disconnect { conn_id: 1 }).unwrap();
        sender.send(SessionCommand::EntropyUnavailable).unwrap();
        sender.try_send_input(1, 0.5).unwrap();
        sender.try_send_input(1, 0.7).unwrap();
        assert_eq!(buffer.pending_inputs(), 2);

        let control = buffer.drain_control();
        assert!(matches!(control[0], SessionCommand::Disconnect { conn_id: 1 }));
        assert!(matches!(control[1], SessionCommand::EntropyUnavailable));

        let inputs = buffer.drain_inputs();
        assert_eq!(inputs.iter().map(|i| i.target_angle).collect::<Vec<_>>(), vec![0.5, 0.7]);
        assert!(buffer.drain_inputs().is_empty());
    }

    #[test]
    fn test_input_backpressure() {
        let buffer = CommandBuffer::new(2);
        let sender = buffer.sender();

        assert!(sender.try_send_input(1, 0.0).is_ok());
        assert!(sender.try_send_input(1, 0.1).is_ok());
        assert_eq!(sender.try_send_input(1, 0.2), Err(CommandError::Full));

        // Control lane is unbounded
        for conn_id in 0..100 {
            sender.send(SessionCommand::Disconnect { conn_id }).unwrap();
        }

        buffer.drain_inputs();
        assert!(sender.try_send_input(1, 0.2).is_ok());
        assert_eq!(buffer.drain_control().len(), 100);
    }

    #[test]
    fn test_disconnected_after_drop() {
        let buffer = CommandBuffer::new(2);
        let sender = buffer.sender();
        drop(buffer);

        assert_eq!(sender.try_send_input(1, 0.0), Err(CommandError::Disconnected));
        assert_eq!(
            sender.send(SessionCommand::EntropyUnavailable),
            Err(CommandError::Disconnected)
        );
    }

    #[test]
    fn test_sender_clone() {
        let buffer = CommandBuffer::default();
        let a = buffer.sender();
        let b = a.clone();
        a.try_send_input(1, 1.0).unwrap();
        b.try_send_input(2, 2.0).unwrap();
        assert_eq!(buffer.drain_inputs().len(), 2);
    }
}
