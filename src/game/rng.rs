//! Seeded world generation
//!
//! Every "random" fact about the world (spawn points, headings, colors, the
//! pellet layout and the map variant) is derived from one externally supplied
//! 256-bit seed. Each value is a pure function of `(seed, tag, args)`: the
//! tag and its arguments are length-prefixed and hashed together with the
//! seed using SHA-256, and the digest is mapped into `[0, 1)`. No state is
//! carried between calls, so two processes holding the same seed reproduce
//! the same world regardless of call order.
//!
//! Until a seed arrives the generator is absent and callers use the
//! `fallback_*` functions, which draw from an ordinary `rand::Rng`.

use std::fmt;

use rand::Rng;
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::WorldConfig;
use crate::game::constants::{pellet, spawn};
use crate::game::pellet::PelletSeed;
use crate::util::Vec2;

const TAG_SPAWN: &str = "spawn";
const TAG_HEADING: &str = "heading";
const TAG_COLOR: &str = "color";
const TAG_PELLETS: &str = "pellets";
const TAG_MAP: &str = "map";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedError {
    #[error("seed must be 64 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("seed contains non-hex character")]
    InvalidHex,
    #[error("all-zero seed rejected")]
    Zero,
}

/// 256-bit session seed
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seed([u8; 32]);

impl Seed {
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, SeedError> {
        if bytes.iter().all(|b| *b == 0) {
            return Err(SeedError::Zero);
        }
        Ok(Self(bytes))
    }

    /// Parse 64 hex characters, with or without a `0x` prefix
    pub fn from_hex(input: &str) -> Result<Self, SeedError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != 64 {
            return Err(SeedError::InvalidLength(digits.len()));
        }

        let mut bytes = [0u8; 32];
        for (i, pair) in digits.as_bytes().chunks(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or(SeedError::InvalidHex)?;
            let lo = hex_value(pair[1]).ok_or(SeedError::InvalidHex)?;
            bytes[i] = (hi << 4) | lo;
        }
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(66);
        out.push_str("0x");
        for b in self.0 {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Seed({}…)", &hex[..10])
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Map variant selected once per seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapType {
    Uniform,
    Clustered,
    Ring,
}

impl MapType {
    /// Fixed probability bands over a unit value
    pub fn from_unit(value: f64) -> Self {
        if value < 0.33 {
            MapType::Uniform
        } else if value < 0.66 {
            MapType::Clustered
        } else {
            MapType::Ring
        }
    }
}

/// Result of a spawn search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPlacement {
    pub position: Vec2,
    /// Attempts consumed, including the accepted one
    pub attempts: u32,
    /// No attempt cleared the minimum distance; the last one was kept
    pub degraded: bool,
}

type Digest = [u8; 32];

/// Domain-separated generator over a session seed
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: Seed,
}

impl DeterministicRng {
    pub fn new(seed: Seed) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    fn derive(&self, tag: &str, args: &[&[u8]]) -> Digest {
        let mut ctx = Context::new(&SHA256);
        ctx.update(self.seed.as_bytes());
        ctx.update(&(tag.len() as u32).to_be_bytes());
        ctx.update(tag.as_bytes());
        for arg in args {
            ctx.update(&(arg.len() as u32).to_be_bytes());
            ctx.update(arg);
        }
        finish(ctx)
    }

    /// Independent sub-value `index` of an already derived digest
    fn child(parent: &Digest, index: u64) -> Digest {
        let mut ctx = Context::new(&SHA256);
        ctx.update(parent);
        ctx.update(&index.to_be_bytes());
        finish(ctx)
    }

    /// Spawn candidate for `identity` on retry `retry`
    pub fn spawn_position(&self, identity: &str, retry: u32, world: &WorldConfig) -> Vec2 {
        let key = identity.to_lowercase();
        let sub = self.derive(TAG_SPAWN, &[key.as_bytes(), &retry.to_be_bytes()]);
        Vec2::new(
            within_margin(unit(&Self::child(&sub, 0)), world.width),
            within_margin(unit(&Self::child(&sub, 1)), world.height),
        )
    }

    /// Retry spawn candidates until one is `MIN_DISTANCE` away from every
    /// alive head, keeping the last candidate if the budget runs out.
    pub fn spawn_with_retry(
        &self,
        identity: &str,
        alive_heads: &[Vec2],
        world: &WorldConfig,
    ) -> SpawnPlacement {
        place_with_retry(alive_heads, |retry| {
            self.spawn_position(identity, retry, world)
        })
    }

    /// Initial heading in `[0, 2π)`
    pub fn spawn_heading(&self, identity: &str) -> f32 {
        let key = identity.to_lowercase();
        let sub = self.derive(TAG_HEADING, &[key.as_bytes()]);
        (unit(&sub) * std::f64::consts::TAU) as f32
    }

    /// CSS `hsl()` color for `identity`
    pub fn snake_color(&self, identity: &str) -> String {
        let key = identity.to_lowercase();
        let sub = self.derive(TAG_COLOR, &[key.as_bytes()]);
        let hue = (unit(&Self::child(&sub, 0)) * 360.0) as u32;
        let saturation = 70 + (unit(&Self::child(&sub, 1)) * 30.0) as u32;
        let lightness = 50 + (unit(&Self::child(&sub, 2)) * 20.0) as u32;
        format_hsl(hue, saturation, lightness)
    }

    /// Complete pellet layout; pellet `i` depends only on the seed and `i`
    pub fn pellet_layout(&self, count: usize, world: &WorldConfig) -> Vec<PelletSeed> {
        let field = self.derive(TAG_PELLETS, &[]);
        (0..count as u64)
            .map(|i| {
                let p = Self::child(&field, i);
                let color_index = (unit(&Self::child(&p, 3)) * pellet::COLORS.len() as f64) as usize;
                PelletSeed {
                    position: Vec2::new(
                        within_edge(unit(&Self::child(&p, 0)), world.width),
                        within_edge(unit(&Self::child(&p, 1)), world.height),
                    ),
                    size: pellet_size(unit(&Self::child(&p, 2))),
                    color: pellet::COLORS[color_index.min(pellet::COLORS.len() - 1)],
                }
            })
            .collect()
    }

    pub fn map_type(&self) -> MapType {
        MapType::from_unit(unit(&self.derive(TAG_MAP, &[])))
    }
}

fn finish(ctx: Context) -> Digest {
    let mut out = [0u8; 32];
    out.copy_from_slice(ctx.finish().as_ref());
    out
}

/// Map the leading 53 bits of a digest into `[0, 1)`
fn unit(digest: &Digest) -> f64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

fn within_margin(value: f64, extent: f32) -> f32 {
    spawn::MARGIN + (value as f32) * (extent - 2.0 * spawn::MARGIN)
}

fn within_edge(value: f64, extent: f32) -> f32 {
    pellet::MAX_SIZE + (value as f32) * (extent - 2.0 * pellet::MAX_SIZE)
}

fn pellet_size(value: f64) -> f32 {
    pellet::MIN_SIZE + (value as f32) * (pellet::MAX_SIZE - pellet::MIN_SIZE)
}

fn format_hsl(hue: u32, saturation: u32, lightness: u32) -> String {
    format!("hsl({}, {}%, {}%)", hue, saturation, lightness)
}

fn place_with_retry(alive_heads: &[Vec2], mut candidate: impl FnMut(u32) -> Vec2) -> SpawnPlacement {
    let min_sq = spawn::MIN_DISTANCE * spawn::MIN_DISTANCE;
    let mut position = Vec2::ZERO;
    for retry in 0..spawn::MAX_RETRIES {
        position = candidate(retry);
        if alive_heads.iter().all(|h| h.distance_sq_to(position) >= min_sq) {
            return SpawnPlacement {
                position,
                attempts: retry + 1,
                degraded: false,
            };
        }
    }
    SpawnPlacement {
        position,
        attempts: spawn::MAX_RETRIES,
        degraded: true,
    }
}

// ============================================================================
// Fallback generation (no seed yet)
// ============================================================================

pub fn fallback_spawn<R: Rng>(rng: &mut R, alive_heads: &[Vec2], world: &WorldConfig) -> SpawnPlacement {
    place_with_retry(alive_heads, |_| {
        Vec2::new(
            within_margin(rng.gen::<f64>(), world.width),
            within_margin(rng.gen::<f64>(), world.height),
        )
    })
}

pub fn fallback_heading<R: Rng>(rng: &mut R) -> f32 {
    rng.gen_range(0.0..std::f32::consts::TAU)
}

pub fn fallback_color<R: Rng>(rng: &mut R) -> String {
    format_hsl(rng.gen_range(0..360), 70, 60)
}

pub fn fallback_pellet_layout<R: Rng>(rng: &mut R, count: usize, world: &WorldConfig) -> Vec<PelletSeed> {
    (0..count)
        .map(|_| PelletSeed {
            position: Vec2::new(
                within_edge(rng.gen::<f64>(), world.width),
                within_edge(rng.gen::<f64>(), world.height),
            ),
            size: pellet_size(rng.gen::<f64>()),
            color: pellet::COLORS[rng.gen_range(0..pellet::COLORS.len())],
        })
        .collect()
}
