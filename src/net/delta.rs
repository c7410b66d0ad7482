//! Per-subscriber delta compression
//!
//! Each subscriber has a remembered view: the snakes, pellet ids and
//! leaderboard of the last snapshot it was synced against. On every snapshot
//! the compressor either asks for the full state (first contact, too many
//! missed ticks, or a replaced pellet field) or emits a change-set against
//! that view, then moves the view to the new snapshot.
//!
//! Key features:
//! - Coarse change detection (sub-pixel jitter is not worth a resend)
//! - Pellets only ever disappear within a field, so only removals are sent
//! - Leaderboard sent only when it differs
//! - Seed and map variant travel in full snapshots only

use hashbrown::{HashMap, HashSet};

use crate::game::constants::sync;
use crate::game::pellet::PelletId;
use crate::game::snake::{shortest_angle_delta, SnakeId};
use crate::game::systems::leaderboard::LeaderboardEntry;
use crate::net::protocol::{DeltaState, GameSnapshot, ServerMessage, SnakeSnapshot};

/// Subscribers are keyed by connection id
pub type SubscriberId = u64;

/// What a subscriber should receive for the current snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    /// Send the snapshot as-is
    Full,
    Delta(DeltaState),
}

#[derive(Debug, Default)]
struct SubscriberView {
    last_tick: u64,
    field_epoch: u32,
    snakes: HashMap<SnakeId, SnakeSnapshot>,
    pellets: HashSet<PelletId>,
    leaderboard: Vec<LeaderboardEntry>,
}

impl SubscriberView {
    fn reset_to(&mut self, snapshot: &GameSnapshot) {
        self.last_tick = snapshot.tick;
        self.field_epoch = snapshot.field_epoch;
        self.snakes = snapshot.snakes.iter().map(|s| (s.id, s.clone())).collect();
        self.pellets = snapshot.pellets.iter().map(|p| p.id).collect();
        self.leaderboard = snapshot.leaderboard.clone();
    }
}

#[derive(Debug, Default)]
pub struct DeltaCompressor {
    subscribers: HashMap<SubscriberId, SubscriberView>,
}

impl DeltaCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide full-or-delta for `subscriber` and advance its remembered
    /// view to `snapshot`, whether or not the message ends up delivered.
    pub fn update(&mut self, subscriber: SubscriberId, snapshot: &GameSnapshot) -> SyncUpdate {
        let stale = self
            .subscribers
            .get(&subscriber)
            .map_or(true, |view| needs_full(view, snapshot));
        if stale {
            self.subscribers
                .entry(subscriber)
                .or_default()
                .reset_to(snapshot);
            return SyncUpdate::Full;
        }
        let Some(view) = self.subscribers.get_mut(&subscriber) else {
            return SyncUpdate::Full;
        };

        let mut delta = DeltaState {
            tick: snapshot.tick,
            match_id: snapshot.match_id.clone(),
            seed_pending: snapshot.seed_pending,
            seed_fallback: snapshot.seed_fallback,
            ..Default::default()
        };

        let mut present: HashSet<SnakeId> = HashSet::with_capacity(snapshot.snakes.len());
        for snake in &snapshot.snakes {
            present.insert(snake.id);
            match view.snakes.get_mut(&snake.id) {
                None => {
                    delta.snakes_added.push(snake.clone());
                    view.snakes.insert(snake.id, snake.clone());
                }
                Some(known) => {
                    if has_changed(known, snake) {
                        delta.snakes_updated.push(snake.clone());
                    }
                    *known = snake.clone();
                }
            }
        }

        view.snakes.retain(|id, _| {
            let keep = present.contains(id);
            if !keep {
                delta.snakes_removed.push(*id);
            }
            keep
        });
        delta.snakes_removed.sort_unstable();

        let current: HashSet<PelletId> = snapshot.pellets.iter().map(|p| p.id).collect();
        delta.pellets_removed = view.pellets.difference(&current).copied().collect();
        delta.pellets_removed.sort_unstable();
        view.pellets = current;

        if view.leaderboard != snapshot.leaderboard {
            view.leaderboard = snapshot.leaderboard.clone();
            delta.leaderboard = Some(snapshot.leaderboard.clone());
        }

        view.last_tick = snapshot.tick;
        SyncUpdate::Delta(delta)
    }

    /// Convenience wrapper producing the wire message
    pub fn message_for(&mut self, subscriber: SubscriberId, snapshot: &GameSnapshot) -> ServerMessage {
        match self.update(subscriber, snapshot) {
            SyncUpdate::Full => ServerMessage::State(snapshot.clone()),
            SyncUpdate::Delta(delta) => ServerMessage::Delta(delta),
        }
    }

    /// Drop remembered state; the next update for this subscriber is full
    pub fn forget(&mut self, subscriber: SubscriberId) {
        self.subscribers.remove(&subscriber);
    }

    pub fn tracked(&self) -> usize {
        self.subscribers.len()
    }
}

fn needs_full(view: &SubscriberView, snapshot: &GameSnapshot) -> bool {
    snapshot.tick.saturating_sub(view.last_tick) > sync::MAX_MISSED_TICKS
        || snapshot.field_epoch != view.field_epoch
}

fn has_changed(known: &SnakeSnapshot, current: &SnakeSnapshot) -> bool {
    (current.head.x - known.head.x).abs() > sync::HEAD_EPSILON
        || (current.head.y - known.head.y).abs() > sync::HEAD_EPSILON
        || current.segments.len() != known.segments.len()
        || shortest_angle_delta(known.angle, current.angle).abs() > sync::ANGLE_EPSILON
}
