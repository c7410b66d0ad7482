//! Simulation clock
//!
//! `GameLoop` owns the session state and advances it one tick at a time:
//!
//! 1. settle finished teardowns and apply queued removes, then joins
//! 2. distribute pellet tokens once the first player is present
//! 3. advance every alive snake by the elapsed time
//! 4. resolve pellet pickups, then snake collisions, then world bounds
//! 5. publish an immutable snapshot
//!
//! Joins and removes are only ever queued; they take effect at the start of
//! the next tick, so nothing outside the loop mutates the snake map while a
//! tick is running. Settlement reports go to a [`SettlementSink`] whose
//! receipts are polled, never awaited.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot::error::TryRecvError;

use crate::game::constants::tick as tick_consts;
use crate::game::pellet::PelletId;
use crate::game::rng::{MapType, Seed};
use crate::game::snake::{Snake, SnakeId};
use crate::game::state::{GameState, SeedApplyError};
use crate::game::systems::collision::{self, CollisionKind};
use crate::game::tokens::Tokens;
use crate::net::protocol::GameSnapshot;
use crate::settlement::{DeliveryReceipt, SettlementReport, SettlementSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub id: SnakeId,
    pub name: String,
    pub identity: Option<String>,
}

/// Why a snake is being torn down outside of normal death
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    Disconnect,
    TapOut,
}

/// State of a snake at the moment it was retired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetireSummary {
    pub score: u32,
    pub tokens: Tokens,
    pub was_alive: bool,
}

/// Things that happened during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Joined {
        id: SnakeId,
        evicted: Vec<SnakeId>,
    },
    Removed {
        id: SnakeId,
    },
    PelletEaten {
        snake_id: SnakeId,
        pellet_id: PelletId,
        growth: u32,
        tokens: Tokens,
    },
    Died {
        id: SnakeId,
        killer: Option<SnakeId>,
        kind: CollisionKind,
        score: u32,
    },
    TokensDistributed {
        total: Tokens,
    },
}

pub struct TickOutcome {
    pub tick: u64,
    pub events: Vec<GameEvent>,
    pub snapshot: Arc<GameSnapshot>,
}

struct Teardown {
    id: SnakeId,
    receipts: Vec<DeliveryReceipt>,
}

pub struct GameLoop {
    state: GameState,
    sink: Arc<dyn SettlementSink>,
    pending_joins: Vec<JoinRequest>,
    pending_removes: Vec<SnakeId>,
    pending_identity_removes: Vec<String>,
    teardowns: Vec<Teardown>,
    last_tick: Option<Instant>,
}

impl GameLoop {
    pub fn new(state: GameState, sink: Arc<dyn SettlementSink>) -> Self {
        Self {
            state,
            sink,
            pending_joins: Vec::new(),
            pending_removes: Vec::new(),
            pending_identity_removes: Vec::new(),
            teardowns: Vec::new(),
            last_tick: None,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot::from_game_state(&self.state)
    }

    // ========================================================================
    // Queued mutation
    // ========================================================================

    /// Applied at the next tick start. A later join for the same id
    /// supersedes an earlier one.
    pub fn queue_join(&mut self, request: JoinRequest) {
        self.pending_joins.retain(|j| j.id != request.id);
        self.pending_joins.push(request);
    }

    /// Applied at the next tick start, deduplicated. Cancels a join for the
    /// same id queued earlier in this batch.
    pub fn queue_remove(&mut self, id: SnakeId) {
        self.pending_joins.retain(|j| j.id != id);
        if !self.pending_removes.contains(&id) {
            self.pending_removes.push(id);
        }
    }

    pub fn queue_remove_by_identity(&mut self, identity: &str) {
        let identity = identity.to_lowercase();
        if !self.pending_identity_removes.contains(&identity) {
            self.pending_identity_removes.push(identity);
        }
    }

    /// Steer an alive snake; unknown or dead snakes are ignored
    pub fn set_heading(&mut self, id: SnakeId, angle: f32) -> bool {
        match self.state.snake_mut(id) {
            Some(snake) if snake.is_alive() => {
                snake.set_target_angle(angle);
                true
            }
            _ => false,
        }
    }

    /// Two-phase teardown. The snake dies silently now, so it stops
    /// colliding and disappears from snapshots; it is removed once every
    /// settlement report it triggered has resolved.
    ///
    /// Disconnecting an alive snake reports a self-death and settles its
    /// tokens; tapping out only settles tokens and requires an alive snake.
    pub fn retire(&mut self, id: SnakeId, reason: RetireReason) -> Option<RetireSummary> {
        if self.teardowns.iter().any(|t| t.id == id) {
            return None;
        }
        let snake = self.state.snake_mut(id)?;
        let was_alive = snake.is_alive();
        if reason == RetireReason::TapOut && !was_alive {
            return None;
        }

        snake.kill();
        let summary = RetireSummary {
            score: snake.score(),
            tokens: snake.pellet_tokens,
            was_alive,
        };
        let identity = snake.identity.clone();

        let mut receipts = Vec::new();
        if let (Some(identity), true) = (identity, was_alive) {
            if reason == RetireReason::Disconnect {
                receipts.push(self.dispatch(SettlementReport::SelfDeath {
                    match_id: self.state.match_id.clone(),
                    identity: identity.clone(),
                    score: summary.score,
                }));
            }
            if !summary.tokens.is_zero() {
                receipts.push(self.dispatch(SettlementReport::TokenSettlement {
                    identity,
                    amount: summary.tokens,
                }));
            }
        }

        tracing::info!(
            "Retiring snake {} ({:?}) with score {} and {} tokens",
            id,
            reason,
            summary.score,
            summary.tokens
        );

        if receipts.is_empty() {
            self.queue_remove(id);
        } else {
            self.teardowns.push(Teardown { id, receipts });
        }
        Some(summary)
    }

    // ========================================================================
    // Entropy
    // ========================================================================

    pub fn await_seed(&mut self) {
        self.state.await_seed();
    }

    pub fn apply_seed(&mut self, seed: Seed) -> Result<MapType, SeedApplyError> {
        let map_type = self.state.apply_seed(seed)?;
        tracing::info!(
            "Seed {:?} applied, map {:?}, {} deterministic pellets",
            seed,
            map_type,
            self.state.pellets.len()
        );
        Ok(map_type)
    }

    pub fn enter_fallback(&mut self) {
        self.state.enter_fallback();
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance by the wall-clock time since the previous tick
    pub fn tick(&mut self) -> TickOutcome {
        let now = Instant::now();
        let dt = match self.last_tick {
            Some(prev) => now.duration_since(prev).as_secs_f32().min(tick_consts::MAX_DT),
            None => tick_consts::DT,
        };
        self.last_tick = Some(now);
        self.tick_with_dt(dt)
    }

    /// Advance by an explicit `dt` seconds
    pub fn tick_with_dt(&mut self, dt: f32) -> TickOutcome {
        self.state.tick += 1;
        let mut events = Vec::new();

        self.poll_teardowns();
        self.apply_pending(&mut events);

        if let Some(total) = self.state.ensure_tokens_distributed() {
            events.push(GameEvent::TokensDistributed { total });
        }

        for snake in self.state.snakes.values_mut() {
            snake.update(dt);
        }

        self.resolve_pellets(&mut events);
        self.resolve_snake_collisions(&mut events);
        self.resolve_boundaries(&mut events);

        TickOutcome {
            tick: self.state.tick,
            events,
            snapshot: Arc::new(GameSnapshot::from_game_state(&self.state)),
        }
    }

    fn poll_teardowns(&mut self) {
        let mut finished = Vec::new();
        self.teardowns.retain_mut(|teardown| {
            teardown
                .receipts
                .retain_mut(|receipt| matches!(receipt.try_recv(), Err(TryRecvError::Empty)));
            if teardown.receipts.is_empty() {
                finished.push(teardown.id);
                false
            } else {
                true
            }
        });
        for id in finished {
            self.queue_remove(id);
        }
    }

    fn apply_pending(&mut self, events: &mut Vec<GameEvent>) {
        for id in std::mem::take(&mut self.pending_removes) {
            if self.state.remove_snake(id).is_some() {
                events.push(GameEvent::Removed { id });
            }
        }

        for identity in std::mem::take(&mut self.pending_identity_removes) {
            if let Some(id) = self.state.find_by_identity(&identity) {
                self.state.remove_snake(id);
                self.teardowns.retain(|t| t.id != id);
                events.push(GameEvent::Removed { id });
            }
        }

        for request in std::mem::take(&mut self.pending_joins) {
            // A rejoin supersedes any teardown still settling for this id
            self.teardowns.retain(|t| t.id != request.id);
            let snake = self
                .state
                .spawn_snake(request.id, request.name, request.identity);
            tracing::info!(
                "Snake {} ({}) joined at ({:.0}, {:.0})",
                snake.id,
                snake.name,
                snake.head.x,
                snake.head.y
            );
            let id = snake.id;
            let evicted = self.state.insert_snake(snake);
            events.push(GameEvent::Joined { id, evicted });
        }
    }

    fn resolve_pellets(&mut self, events: &mut Vec<GameEvent>) {
        let pickups = {
            let snakes: Vec<&Snake> = self.state.snakes.values().collect();
            collision::detect_pellet_pickups(&snakes, &self.state.pellets)
        };

        for pickup in pickups {
            let Some(pellet) = self.state.consume_pellet(pickup.pellet_id) else {
                continue;
            };
            let growth = (pellet.size / 2.0).round() as u32;
            if let Some(snake) = self.state.snake_mut(pickup.snake_id) {
                snake.grow(growth);
                snake.add_tokens(pellet.tokens);
            }
            events.push(GameEvent::PelletEaten {
                snake_id: pickup.snake_id,
                pellet_id: pellet.id,
                growth,
                tokens: pellet.tokens,
            });
        }
    }

    fn resolve_snake_collisions(&mut self, events: &mut Vec<GameEvent>) {
        let collisions = {
            let snakes: Vec<&Snake> = self.state.snakes.values().collect();
            collision::detect_snake_collisions(&snakes)
        };

        for hit in collisions {
            // A killer that already died this tick earns nothing
            let killer = hit
                .killer
                .and_then(|id| self.state.snake(id))
                .filter(|k| k.is_alive())
                .map(|k| (k.id, k.identity.clone()));

            let Some(victim) = self.state.snake_mut(hit.victim) else {
                continue;
            };
            if !victim.is_alive() {
                continue;
            }
            victim.kill();
            let score = victim.score();
            let victim_identity = victim.identity.clone();

            match killer {
                Some((killer_id, killer_identity)) => {
                    let tokens = victim.take_tokens();
                    if let Some(k) = self.state.snake_mut(killer_id) {
                        k.grow(score);
                        k.add_tokens(tokens);
                    }
                    tracing::info!(
                        "Snake {} ate snake {}, gaining {} length and {} tokens",
                        killer_id,
                        hit.victim,
                        score,
                        tokens
                    );
                    if let (Some(killer), Some(victim)) = (killer_identity, victim_identity) {
                        self.dispatch(SettlementReport::Eat {
                            match_id: self.state.match_id.clone(),
                            killer,
                            victim,
                        });
                    }
                    events.push(GameEvent::Died {
                        id: hit.victim,
                        killer: Some(killer_id),
                        kind: hit.kind,
                        score,
                    });
                }
                None => {
                    tracing::info!("Snake {} died ({:?}) with score {}", hit.victim, hit.kind, score);
                    if let Some(identity) = victim_identity {
                        self.dispatch(SettlementReport::SelfDeath {
                            match_id: self.state.match_id.clone(),
                            identity,
                            score,
                        });
                    }
                    events.push(GameEvent::Died {
                        id: hit.victim,
                        killer: None,
                        kind: hit.kind,
                        score,
                    });
                }
            }
        }
    }

    fn resolve_boundaries(&mut self, events: &mut Vec<GameEvent>) {
        let out_of_bounds = {
            let snakes: Vec<&Snake> = self.state.snakes.values().collect();
            collision::detect_boundary(&snakes, &self.state.world)
        };

        for id in out_of_bounds {
            let Some(snake) = self.state.snake_mut(id) else {
                continue;
            };
            snake.kill();
            let score = snake.score();
            let identity = snake.identity.clone();
            tracing::info!("Snake {} left the arena with score {}", id, score);
            if let Some(identity) = identity {
                self.dispatch(SettlementReport::SelfDeath {
                    match_id: self.state.match_id.clone(),
                    identity,
                    score,
                });
            }
            events.push(GameEvent::Died {
                id,
                killer: None,
                kind: CollisionKind::Boundary,
                score,
            });
        }
    }

    fn dispatch(&self, report: SettlementReport) -> DeliveryReceipt {
        tracing::debug!("Dispatching settlement report: {}", report.describe());
        self.sink.submit(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::game::pellet::{FieldMode, PelletField, PelletSeed};
    use crate::game::snake::Snake;
    use crate::settlement::testing::RecordingSink;
    use crate::util::Vec2;
    use std::f32::consts::{FRAC_PI_2, PI};

    const DT: f32 = tick_consts::DT;

    fn seed(byte: u8) -> Seed {
        Seed::from_bytes([byte; 32]).unwrap()
    }

    /// Loop with an empty pellet field so nothing interferes with placed snakes
    fn bare_loop() -> (GameLoop, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let mut state = GameState::new("match-1", WorldConfig::default());
        state.pellets = PelletField::new(FieldMode::Deterministic, Vec::new(), 10_000);
        (GameLoop::new(state, sink.clone()), sink)
    }

    fn place(game: &mut GameLoop, id: SnakeId, identity: &str, head: Vec2, angle: f32) {
        let snake = Snake::new(id, format!("s{}", id), Some(identity.into()), head, angle, "#fff".into());
        game.state_mut().insert_snake(snake);
    }

    /// Move a free-standing snake so its trail is made of real positions
    fn advanced(mut snake: Snake, ticks: usize) -> Snake {
        for _ in 0..ticks {
            snake.update(DT);
        }
        snake
    }

    fn join(id: SnakeId, identity: Option<&str>) -> JoinRequest {
        JoinRequest {
            id,
            name: format!("p{}", id),
            identity: identity.map(str::to_string),
        }
    }

    #[test]
    fn test_head_on_both_die_without_transfer() {
        let (mut game, sink) = bare_loop();
        game.apply_seed(seed(42)).unwrap();
        game.state_mut().pellets = PelletField::new(FieldMode::Deterministic, Vec::new(), 50_000);
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        place(&mut game, 2, "0xbbb", Vec2::new(1040.0, 1000.0), PI);

        let first = game.tick_with_dt(DT);
        assert!(!first.events.iter().any(|e| matches!(e, GameEvent::Died { .. })));

        let second = game.tick_with_dt(DT);
        let deaths: Vec<_> = second
            .events
            .iter()
            .filter_map(|e| match e {
                GameEvent::Died { id, killer, kind, .. } => Some((*id, *killer, *kind)),
                _ => None,
            })
            .collect();
        assert_eq!(
            deaths,
            vec![(1, None, CollisionKind::HeadOn), (2, None, CollisionKind::HeadOn)]
        );

        for id in [1, 2] {
            let snake = game.state().snake(id).unwrap();
            assert!(!snake.is_alive());
            assert_eq!(snake.length, 5);
            assert!(snake.pellet_tokens.is_zero());
        }
        assert!(second.snapshot.snakes.is_empty());
        assert!(sink
            .reports()
            .iter()
            .all(|r| matches!(r, SettlementReport::SelfDeath { score: 5, .. })));
        assert_eq!(sink.reports().len(), 2);
    }

    #[test]
    fn test_pellet_pickup_growth_and_tokens() {
        let (mut game, _sink) = bare_loop();
        let seeds = vec![PelletSeed {
            position: Vec2::new(1017.5, 1000.0),
            size: 8.0,
            color: "#F7DC6F",
        }];
        let mut field = PelletField::new(FieldMode::Deterministic, seeds, 777);
        field.distribute_tokens(Tokens::try_from_f64(3.5).unwrap()).unwrap();
        game.state_mut().pellets = field;
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);

        let outcome = game.tick_with_dt(DT);
        let snake = game.state().snake(1).unwrap();
        assert_eq!(snake.length, 5 + 4);
        assert_eq!(snake.pellet_tokens, Tokens::try_from_f64(3.5).unwrap());
        assert!(outcome.events.contains(&GameEvent::PelletEaten {
            snake_id: 1,
            pellet_id: 777,
            growth: 4,
            tokens: Tokens::from_micros(3_500_000),
        }));
        assert!(!outcome.snapshot.has_pellet(777));

        let next = game.tick_with_dt(DT);
        assert!(!next.snapshot.has_pellet(777));
        assert_eq!(next.snapshot.snake(1).unwrap().tokens, 3.5);
    }

    #[test]
    fn test_eat_transfers_score_and_tokens() {
        let (mut game, sink) = bare_loop();

        let eater = advanced(
            Snake::new(1, "A".into(), Some("0xaaa".into()), Vec2::new(925.0, 1000.0), 0.0, "#f00".into()),
            10,
        );
        let mut prey = Snake::new(
            2,
            "B".into(),
            Some("0xbbb".into()),
            Vec2::new(975.0, 970.0 - 7.5 * 30.0),
            FRAC_PI_2,
            "#0f0".into(),
        );
        prey.grow(7);
        prey.add_tokens(Tokens::try_from_f64(2.0).unwrap());
        let prey = advanced(prey, 30);
        assert!(eater.head.approx_eq(Vec2::new(1000.0, 1000.0), 0.01));
        assert!(prey.head.approx_eq(Vec2::new(975.0, 970.0), 0.01));
        assert_eq!(prey.length, 12);

        game.state_mut().insert_snake(eater);
        game.state_mut().insert_snake(prey);

        game.tick_with_dt(DT);
        assert!(game.state().snake(2).unwrap().is_alive());

        let outcome = game.tick_with_dt(DT);
        let a = game.state().snake(1).unwrap();
        let b = game.state().snake(2).unwrap();
        assert!(a.is_alive());
        assert!(!b.is_alive());
        assert_eq!(a.length, 5 + 12);
        assert_eq!(a.pellet_tokens, Tokens::try_from_f64(2.0).unwrap());
        assert!(outcome.events.contains(&GameEvent::Died {
            id: 2,
            killer: Some(1),
            kind: CollisionKind::Body,
            score: 12,
        }));

        let eats: Vec<SettlementReport> = sink
            .reports()
            .into_iter()
            .filter(|r| matches!(r, SettlementReport::Eat { .. }))
            .collect();
        assert_eq!(
            eats,
            vec![SettlementReport::Eat {
                match_id: "match-1".into(),
                killer: "0xaaa".into(),
                victim: "0xbbb".into(),
            }]
        );
    }

    #[test]
    fn test_mutual_kill_credits_only_first_detected() {
        let (mut game, sink) = bare_loop();
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        place(&mut game, 2, "0xbbb", Vec2::new(2000.0, 2000.0), 0.0);
        game.tick_with_dt(DT);

        // Each head sits on the other's body
        let (h1, h2) = {
            let s = game.state();
            (s.snake(1).unwrap().head, s.snake(2).unwrap().head)
        };
        game.state_mut().snake_mut(1).unwrap().segments.push(h2 + Vec2::new(0.0, 4.0));
        game.state_mut().snake_mut(2).unwrap().segments.push(h1 + Vec2::new(0.0, 4.0));

        let mut events = Vec::new();
        game.resolve_snake_collisions(&mut events);

        let a = game.state().snake(1).unwrap();
        let b = game.state().snake(2).unwrap();
        assert!(!a.is_alive());
        assert!(!b.is_alive());
        // 1 scanned first: killed by 2, who grows; 2's killer is then dead
        assert_eq!(b.length, 10);
        assert_eq!(a.length, 5);
        assert_eq!(
            sink.reports(),
            vec![
                SettlementReport::Eat {
                    match_id: "match-1".into(),
                    killer: "0xbbb".into(),
                    victim: "0xaaa".into(),
                },
                SettlementReport::SelfDeath {
                    match_id: "match-1".into(),
                    identity: "0xbbb".into(),
                    score: 10,
                },
            ]
        );
    }

    #[test]
    fn test_boundary_death() {
        let (mut game, sink) = bare_loop();
        place(&mut game, 1, "0xedge", Vec2::new(15.0, 2500.0), PI);
        let outcome = game.tick_with_dt(DT);
        assert!(outcome.events.contains(&GameEvent::Died {
            id: 1,
            killer: None,
            kind: CollisionKind::Boundary,
            score: 5,
        }));
        assert_eq!(sink.reports().len(), 1);
    }

    #[test]
    fn test_removes_apply_before_joins() {
        let (mut game, _sink) = bare_loop();
        game.queue_join(join(1, Some("0xaaa")));
        game.tick_with_dt(DT);
        game.state_mut().snake_mut(1).unwrap().grow(10);

        game.queue_remove(1);
        game.queue_join(join(1, Some("0xaaa")));
        let outcome = game.tick_with_dt(DT);

        assert_eq!(outcome.events[0], GameEvent::Removed { id: 1 });
        assert!(matches!(outcome.events[1], GameEvent::Joined { id: 1, .. }));
        let snake = game.state().snake(1).unwrap();
        assert_eq!(snake.length, 5);
        assert!(snake.is_alive());
    }

    #[test]
    fn test_remove_cancels_earlier_join_and_dedups() {
        let (mut game, _sink) = bare_loop();
        game.queue_join(join(1, None));
        game.queue_join(join(2, None));
        game.tick_with_dt(DT);

        game.queue_join(join(3, None));
        game.queue_remove(3);
        game.queue_remove(2);
        game.queue_remove(2);
        game.queue_remove(99);
        let outcome = game.tick_with_dt(DT);

        let removed: Vec<&GameEvent> = outcome
            .events
            .iter()
            .filter(|e| matches!(e, GameEvent::Removed { .. }))
            .collect();
        assert_eq!(removed, vec![&GameEvent::Removed { id: 2 }]);
        assert!(game.state().snake(3).is_none());
        assert_eq!(game.state().snakes.len(), 1);
    }

    #[test]
    fn test_rejoin_same_identity_evicts() {
        let (mut game, _sink) = bare_loop();
        game.queue_join(join(1, Some("0xAbC")));
        game.tick_with_dt(DT);
        game.queue_join(join(2, Some("0xabc")));
        let outcome = game.tick_with_dt(DT);

        assert!(outcome.events.contains(&GameEvent::Joined {
            id: 2,
            evicted: vec![1]
        }));
        assert!(game.state().snake(1).is_none());

        game.queue_remove_by_identity("0xABC");
        let outcome = game.tick_with_dt(DT);
        assert!(outcome.events.contains(&GameEvent::Removed { id: 2 }));
        assert!(game.state().snakes.is_empty());
    }

    #[test]
    fn test_set_heading_ignores_dead_and_unknown() {
        let (mut game, _sink) = bare_loop();
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        assert!(game.set_heading(1, 1.0));
        assert!(!game.set_heading(9, 1.0));

        game.state_mut().snake_mut(1).unwrap().kill();
        assert!(!game.set_heading(1, 2.0));
        assert_eq!(game.state().snake(1).unwrap().target_angle, 1.0);
    }

    #[test]
    fn test_dead_stays_dead_until_rejoin() {
        let (mut game, _sink) = bare_loop();
        place(&mut game, 1, "0xedge", Vec2::new(15.0, 2500.0), PI);
        game.tick_with_dt(DT);
        for _ in 0..20 {
            game.tick_with_dt(DT);
            assert!(!game.state().snake(1).unwrap().is_alive());
        }

        game.queue_join(join(1, Some("0xedge")));
        game.tick_with_dt(DT);
        assert!(game.state().snake(1).unwrap().is_alive());
    }

    #[test]
    fn test_disconnect_two_phase_teardown() {
        let (mut game, sink) = bare_loop();
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        game.state_mut()
            .snake_mut(1)
            .unwrap()
            .add_tokens(Tokens::from_micros(1_000_000));

        let summary = game.retire(1, RetireReason::Disconnect).unwrap();
        assert!(summary.was_alive);
        assert_eq!(summary.tokens, Tokens::from_micros(1_000_000));
        assert_eq!(sink.reports().len(), 2);
        assert!(game.retire(1, RetireReason::Disconnect).is_none());

        // Flagged now: gone from snapshots, not yet from the session
        let outcome = game.tick_with_dt(DT);
        assert!(outcome.snapshot.snake(1).is_none());
        assert!(game.state().snake(1).is_some());

        sink.release_all();
        let outcome = game.tick_with_dt(DT);
        assert!(outcome.events.contains(&GameEvent::Removed { id: 1 }));
        assert!(game.state().snake(1).is_none());
    }

    #[test]
    fn test_retired_snake_cannot_be_eaten() {
        let (mut game, sink) = bare_loop();
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        place(&mut game, 2, "0xbbb", Vec2::new(1010.0, 1000.0), PI);
        game.retire(1, RetireReason::Disconnect).unwrap();

        let outcome = game.tick_with_dt(DT);
        assert!(!outcome.events.iter().any(|e| matches!(e, GameEvent::Died { .. })));
        assert!(game.state().snake(2).unwrap().is_alive());
        assert_eq!(sink.reports().len(), 1);
    }

    #[test]
    fn test_tap_out_requires_alive() {
        let (mut game, sink) = bare_loop();
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        game.state_mut().snake_mut(1).unwrap().kill();
        assert!(game.retire(1, RetireReason::TapOut).is_none());
        assert!(sink.reports().is_empty());

        place(&mut game, 2, "0xbbb", Vec2::new(2000.0, 2000.0), 0.0);
        let summary = game.retire(2, RetireReason::TapOut).unwrap();
        assert_eq!(summary.score, 5);
        // No tokens: nothing to settle, removal is queued right away
        assert!(sink.reports().is_empty());
        let outcome = game.tick_with_dt(DT);
        assert!(outcome.events.contains(&GameEvent::Removed { id: 2 }));
    }

    #[test]
    fn test_rejoin_supersedes_teardown() {
        let (mut game, sink) = bare_loop();
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        game.state_mut()
            .snake_mut(1)
            .unwrap()
            .add_tokens(Tokens::from_micros(10));
        game.retire(1, RetireReason::TapOut).unwrap();

        game.queue_join(join(1, Some("0xaaa")));
        game.tick_with_dt(DT);
        sink.release_all();
        game.tick_with_dt(DT);
        assert!(game.state().snake(1).unwrap().is_alive());
    }

    #[test]
    fn test_token_distribution_on_first_player() {
        let sink = Arc::new(RecordingSink::default());
        let mut game = GameLoop::new(GameState::new("m", WorldConfig::default()), sink);
        let outcome = game.tick_with_dt(DT);
        assert!(!outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::TokensDistributed { .. })));

        game.queue_join(join(1, None));
        let outcome = game.tick_with_dt(DT);
        let total = Tokens::from_micros(666_667);
        assert!(outcome
            .events
            .contains(&GameEvent::TokensDistributed { total }));

        let sum: Tokens = game.state().pellets.iter().map(|p| p.tokens).sum();
        // Anything eaten on this tick moved onto the snake
        let eaten: Tokens = game.state().snake(1).unwrap().pellet_tokens;
        assert_eq!(sum + eaten, total);

        game.queue_join(join(2, None));
        let outcome = game.tick_with_dt(DT);
        assert!(!outcome
            .events
            .iter()
            .any(|e| matches!(e, GameEvent::TokensDistributed { .. })));
    }

    #[test]
    fn test_same_seed_same_session() {
        let run = || {
            let sink = Arc::new(RecordingSink::default());
            let mut game = GameLoop::new(GameState::new("m", WorldConfig::default()), sink);
            game.apply_seed(seed(77)).unwrap();
            game.queue_join(join(1, Some("0x111")));
            game.queue_join(join(2, Some("0x222")));
            let mut snapshots = Vec::new();
            for t in 0..30 {
                game.set_heading(1, t as f32 * 0.2);
                game.set_heading(2, -(t as f32) * 0.1);
                snapshots.push((*game.tick_with_dt(DT).snapshot).clone());
            }
            snapshots
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_seed_flags_in_snapshot() {
        let (mut game, _sink) = bare_loop();
        game.await_seed();
        let snapshot = game.tick_with_dt(DT).snapshot;
        assert!(snapshot.seed_pending);
        assert!(!snapshot.seed_fallback);

        game.enter_fallback();
        let snapshot = game.tick_with_dt(DT).snapshot;
        assert!(!snapshot.seed_pending);
        assert!(snapshot.seed_fallback);
    }

    #[test]
    fn test_elapsed_time_drives_motion() {
        let (mut game, _sink) = bare_loop();
        place(&mut game, 1, "0xaaa", Vec2::new(1000.0, 1000.0), 0.0);
        game.tick_with_dt(0.1);
        let head = game.state().snake(1).unwrap().head;
        assert!(head.approx_eq(Vec2::new(1015.0, 1000.0), 0.01));
    }
}
