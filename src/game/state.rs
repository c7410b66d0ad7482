//! Authoritative session state
//!
//! Holds the live snakes, the pellet field and the entropy status of the
//! single long-lived match. Only the game loop mutates it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::WorldConfig;
use crate::game::constants::pellet as pellet_consts;
use crate::game::pellet::{DistributionError, FieldMode, Pellet, PelletField, PelletId};
use crate::game::rng::{self, DeterministicRng, MapType, Seed, SpawnPlacement};
use crate::game::snake::{Snake, SnakeId};
use crate::game::tokens::Tokens;
use crate::util::Vec2;

/// Where world generation currently draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntropyMode {
    /// Waiting for the external seed; generation is non-deterministic meanwhile
    Pending,
    /// Seed applied; generation is reproducible
    Seeded,
    /// No seed will arrive; generation stays non-deterministic
    Fallback,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedApplyError {
    #[error("session already seeded")]
    AlreadySeeded,
}

pub struct GameState {
    pub match_id: String,
    pub tick: u64,
    pub world: WorldConfig,
    /// Ordered by id, which is also join order
    pub snakes: BTreeMap<SnakeId, Snake>,
    pub pellets: PelletField,
    next_pellet_id: PelletId,
    generator: Option<DeterministicRng>,
    entropy: EntropyMode,
    /// Bumped whenever the pellet field is replaced wholesale
    field_epoch: u32,
    token_budget: Option<Tokens>,
}

impl GameState {
    /// Fresh session with a randomized pellet field, in fallback mode until
    /// a seed is requested.
    pub fn new(match_id: impl Into<String>, world: WorldConfig) -> Self {
        let layout = rng::fallback_pellet_layout(&mut rand::thread_rng(), world.pellet_count, &world);
        let pellets = PelletField::new(FieldMode::Randomized, layout, 0);
        Self {
            match_id: match_id.into(),
            tick: 0,
            world,
            snakes: BTreeMap::new(),
            next_pellet_id: world.pellet_count as PelletId,
            pellets,
            generator: None,
            entropy: EntropyMode::Fallback,
            field_epoch: 0,
            token_budget: None,
        }
    }

    // ========================================================================
    // Entropy
    // ========================================================================

    pub fn entropy_mode(&self) -> EntropyMode {
        self.entropy
    }

    /// A seed request is in flight
    pub fn await_seed(&mut self) {
        if self.generator.is_none() {
            self.entropy = EntropyMode::Pending;
        }
    }

    /// Give up waiting; no-op once seeded
    pub fn enter_fallback(&mut self) {
        if self.entropy == EntropyMode::Pending {
            self.entropy = EntropyMode::Fallback;
        }
    }

    pub fn seed(&self) -> Option<&Seed> {
        self.generator.as_ref().map(|g| g.seed())
    }

    pub fn map_type(&self) -> Option<MapType> {
        self.generator.as_ref().map(|g| g.map_type())
    }

    pub fn field_epoch(&self) -> u32 {
        self.field_epoch
    }

    /// Install the session seed and replace the pellet field with the
    /// deterministic layout. Accepted at most once.
    pub fn apply_seed(&mut self, seed: Seed) -> Result<MapType, SeedApplyError> {
        if self.generator.is_some() {
            return Err(SeedApplyError::AlreadySeeded);
        }

        let generator = DeterministicRng::new(seed);
        let layout = generator.pellet_layout(self.world.pellet_count, &self.world);
        let map_type = generator.map_type();

        // Tokens already eaten stay with the snakes; only the rest moves over
        let unclaimed: Tokens = self.pellets.iter().map(|p| p.tokens).sum();
        self.pellets = PelletField::new(FieldMode::Deterministic, layout, self.next_pellet_id);
        self.next_pellet_id += self.world.pellet_count as PelletId;
        self.field_epoch += 1;
        self.generator = Some(generator);
        self.entropy = EntropyMode::Seeded;

        if self.token_budget.is_some() && !unclaimed.is_zero() {
            self.distribute_into_field(unclaimed);
        }

        Ok(map_type)
    }

    // ========================================================================
    // Snakes
    // ========================================================================

    /// Build a snake for `id` without inserting it. Placement avoids alive
    /// heads; a crowded arena degrades to the last candidate.
    pub fn spawn_snake(&self, id: SnakeId, name: String, identity: Option<String>) -> Snake {
        let heads: Vec<Vec2> = self.alive_snakes().map(|s| s.head).collect();
        let key = identity.clone().unwrap_or_else(|| format!("snake-{}", id));

        let (placement, heading, color) = match &self.generator {
            Some(generator) => (
                generator.spawn_with_retry(&key, &heads, &self.world),
                generator.spawn_heading(&key),
                generator.snake_color(&key),
            ),
            None => {
                let mut rng = rand::thread_rng();
                (
                    rng::fallback_spawn(&mut rng, &heads, &self.world),
                    rng::fallback_heading(&mut rng),
                    rng::fallback_color(&mut rng),
                )
            }
        };

        log_placement(id, &placement, self.generator.is_some());
        Snake::new(id, name, identity, placement.position, heading, color)
    }

    /// Insert `snake`, evicting any snake with the same id or identity.
    /// Returns the evicted ids.
    pub fn insert_snake(&mut self, snake: Snake) -> Vec<SnakeId> {
        let mut evicted = Vec::new();
        if self.snakes.remove(&snake.id).is_some() {
            evicted.push(snake.id);
        }
        if let Some(identity) = &snake.identity {
            if let Some(stale) = self.find_by_identity(identity) {
                self.snakes.remove(&stale);
                evicted.push(stale);
            }
        }
        self.snakes.insert(snake.id, snake);
        evicted
    }

    pub fn remove_snake(&mut self, id: SnakeId) -> Option<Snake> {
        self.snakes.remove(&id)
    }

    /// Case-insensitive identity lookup
    pub fn find_by_identity(&self, identity: &str) -> Option<SnakeId> {
        self.snakes
            .values()
            .find(|s| {
                s.identity
                    .as_deref()
                    .is_some_and(|i| i.eq_ignore_ascii_case(identity))
            })
            .map(|s| s.id)
    }

    pub fn snake(&self, id: SnakeId) -> Option<&Snake> {
        self.snakes.get(&id)
    }

    pub fn snake_mut(&mut self, id: SnakeId) -> Option<&mut Snake> {
        self.snakes.get_mut(&id)
    }

    pub fn alive_snakes(&self) -> impl Iterator<Item = &Snake> {
        self.snakes.values().filter(|s| s.is_alive())
    }

    pub fn alive_count(&self) -> usize {
        self.alive_snakes().count()
    }

    // ========================================================================
    // Pellets & tokens
    // ========================================================================

    pub fn consume_pellet(&mut self, id: PelletId) -> Option<Pellet> {
        self.pellets.remove(id)
    }

    pub fn token_budget(&self) -> Option<Tokens> {
        self.token_budget
    }

    /// One-time token distribution, triggered by the first tick that sees
    /// at least one snake. Every snake present counts, dead or retiring
    /// ones included. Returns the total when it ran.
    pub fn ensure_tokens_distributed(&mut self) -> Option<Tokens> {
        if self.token_budget.is_some() {
            return None;
        }
        let players = self.snakes.len();
        if players == 0 {
            return None;
        }

        let raw = self.world.pellet_count as f64 * players as f64 / pellet_consts::TOKEN_DIVISOR;
        let total = match Tokens::try_from_f64(raw) {
            Ok(total) => total,
            Err(e) => {
                tracing::error!("Refusing pellet token budget: {}", e);
                return None;
            }
        };

        self.token_budget = Some(total);
        self.distribute_into_field(total);
        Some(total)
    }

    fn distribute_into_field(&mut self, total: Tokens) {
        match self.pellets.distribute_tokens(total) {
            Ok(()) => {
                tracing::info!(
                    "Distributed {} tokens across {} pellets",
                    total,
                    self.pellets.len()
                );
            }
            Err(DistributionError::AlreadyDistributed) => {
                tracing::debug!("Pellet tokens already distributed for this field");
            }
            Err(DistributionError::Empty) => {
                tracing::warn!("No pellets left to carry {} tokens", total);
            }
        }
    }
}

fn log_placement(id: SnakeId, placement: &SpawnPlacement, seeded: bool) {
    if placement.degraded {
        tracing::warn!(
            "Spawn for snake {} kept a crowded position after {} attempts",
            id,
            placement.attempts
        );
    } else if !seeded {
        tracing::debug!("Spawned snake {} with fallback randomness", id);
    }
}
