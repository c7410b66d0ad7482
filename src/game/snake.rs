//! Snake entity: heading, position trail and derived body segments
//!
//! The trail is a polyline of past head positions, newest first. Body
//! segments are never stored independently; they are resampled from the
//! trail every tick at fixed arc-length intervals so spacing stays even no
//! matter how sharply the snake turns or how finely the trail is sampled.

use std::collections::VecDeque;
use std::f32::consts::{PI, TAU};

use crate::game::constants::snake;
use crate::game::tokens::Tokens;
use crate::util::Vec2;

/// Stable for the lifetime of the owning connection
pub type SnakeId = u64;

#[derive(Debug, Clone)]
pub struct Snake {
    pub id: SnakeId,
    pub name: String,
    /// External (wallet) identity, lowercased
    pub identity: Option<String>,
    pub head: Vec2,
    /// Current heading in `[0, 2π)`
    pub angle: f32,
    pub target_angle: f32,
    pub segments: Vec<Vec2>,
    pub length: u32,
    pub color: String,
    pub pellet_tokens: Tokens,
    alive: bool,
    trail: VecDeque<Vec2>,
}

impl Snake {
    pub fn new(
        id: SnakeId,
        name: String,
        identity: Option<String>,
        head: Vec2,
        angle: f32,
        color: String,
    ) -> Self {
        let angle = normalize_angle(angle);
        let length = snake::INITIAL_LENGTH;
        let back = Vec2::from_angle(angle) * -snake::INITIAL_TRAIL_SPACING;
        let trail = (0..trail_capacity(length))
            .map(|i| head + back * i as f32)
            .collect();

        let mut snake = Self {
            id,
            name,
            identity,
            head,
            angle,
            target_angle: angle,
            segments: Vec::with_capacity(length as usize),
            length,
            color,
            pellet_tokens: Tokens::ZERO,
            alive: true,
            trail,
        };
        snake.rebuild_segments();
        snake
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Score is the snake's length
    #[inline]
    pub fn score(&self) -> u32 {
        self.length
    }

    /// Ignored for non-finite angles
    pub fn set_target_angle(&mut self, angle: f32) {
        if angle.is_finite() {
            self.target_angle = normalize_angle(angle);
        }
    }

    /// Advance one tick of `dt` seconds. Dead snakes do not move.
    pub fn update(&mut self, dt: f32) {
        if !self.alive {
            return;
        }

        let max_turn = snake::MAX_ROTATION_SPEED * dt;
        let diff = shortest_angle_delta(self.angle, self.target_angle);
        if diff.abs() <= max_turn {
            self.angle = self.target_angle;
        } else {
            self.angle = normalize_angle(self.angle + max_turn.copysign(diff));
        }

        self.head += Vec2::from_angle(self.angle) * (snake::BASE_SPEED * dt);
        self.trail.push_front(self.head);
        self.trail.truncate(trail_capacity(self.length));

        self.rebuild_segments();
    }

    /// Only lengthens; the body catches up as the trail grows
    pub fn grow(&mut self, amount: u32) {
        self.length = self.length.saturating_add(amount);
    }

    pub fn add_tokens(&mut self, amount: Tokens) {
        self.pellet_tokens += amount;
    }

    /// Hand the whole balance over, leaving zero behind
    pub fn take_tokens(&mut self) -> Tokens {
        std::mem::take(&mut self.pellet_tokens)
    }

    /// Idempotent
    pub fn kill(&mut self) {
        self.alive = false;
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    fn rebuild_segments(&mut self) {
        self.segments.clear();
        for i in 0..self.length {
            let distance = (i + 1) as f32 * snake::SEGMENT_SPACING;
            self.segments.push(self.point_at_distance(distance));
        }
    }

    /// Walk the trail from the head and interpolate the point `distance`
    /// units along it; clamps to the tail when the trail is too short.
    fn point_at_distance(&self, distance: f32) -> Vec2 {
        let mut walked = 0.0;
        let mut iter = self.trail.iter();
        let Some(mut prev) = iter.next().copied() else {
            return self.head;
        };

        for &next in iter {
            let step = prev.distance_to(next);
            if step <= f32::EPSILON {
                prev = next;
                continue;
            }
            if walked + step >= distance {
                return prev.lerp(next, (distance - walked) / step);
            }
            walked += step;
            prev = next;
        }
        prev
    }
}

fn trail_capacity(length: u32) -> usize {
    length as usize * snake::TRAIL_FACTOR
}

/// Wrap into `[0, 2π)`
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`, in `(−π, π]`
pub fn shortest_angle_delta(from: f32, to: f32) -> f32 {
    let delta = (to - from + PI).rem_euclid(TAU) - PI;
    if delta <= -PI {
        delta + TAU
    } else {
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::tick;

    const EPSILON: f32 = 1e-3;

    fn snake_at(x: f32, y: f32, angle: f32) -> Snake {
        Snake::new(1, "test".into(), None, Vec2::new(x, y), angle, "#fff".into())
    }

    #[test]
    fn test_new_snake_layout() {
        let s = snake_at(1000.0, 1000.0, 0.0);
        assert!(s.is_alive());
        assert_eq!(s.length, snake::INITIAL_LENGTH);
        assert_eq!(s.segments.len(), snake::INITIAL_LENGTH as usize);
        assert_eq!(s.trail_len(), trail_capacity(s.length));
        assert_eq!(s.score(), snake::INITIAL_LENGTH);
        assert!(s.pellet_tokens.is_zero());
    }

    #[test]
    fn test_initial_trail_clamps_segments() {
        // 15 trail points spaced 2 apart cover only 28 units, so the later
        // segments sit on the tail point.
        let s = snake_at(1000.0, 1000.0, 0.0);
        assert!(s.segments[0].approx_eq(Vec2::new(985.0, 1000.0), EPSILON));
        let tail = Vec2::new(1000.0 - 28.0, 1000.0);
        assert!(s.segments[4].approx_eq(tail, EPSILON));
    }

    #[test]
    fn test_segments_evenly_spaced_after_moving() {
        let mut s = snake_at(1000.0, 1000.0, 0.0);
        for _ in 0..40 {
            s.update(tick::DT);
        }
        assert!(s.head.approx_eq(Vec2::new(1000.0 + 40.0 * 7.5, 1000.0), 0.01));
        for (i, seg) in s.segments.iter().enumerate() {
            let expected = s.head.x - (i as f32 + 1.0) * snake::SEGMENT_SPACING;
            assert!((seg.x - expected).abs() < 0.01, "segment {} at {:?}", i, seg);
            assert!((seg.y - 1000.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_rotation_capped() {
        let mut s = snake_at(1000.0, 1000.0, 0.0);
        s.set_target_angle(PI);
        s.update(0.05);
        let max_turn = snake::MAX_ROTATION_SPEED * 0.05;
        // From 0 to π the delta is +π, so the snake turns positive
        assert!((s.angle - max_turn).abs() < EPSILON);
    }

    #[test]
    fn test_rotation_takes_short_way_round() {
        let mut s = snake_at(1000.0, 1000.0, 0.1);
        s.set_target_angle(TAU - 0.1);
        s.update(0.05);
        assert!((s.angle - (TAU - 0.1)).abs() < EPSILON);
    }

    #[test]
    fn test_rotation_snaps_within_cap() {
        let mut s = snake_at(1000.0, 1000.0, 1.0);
        s.set_target_angle(1.2);
        s.update(0.05);
        assert!((s.angle - 1.2).abs() < EPSILON);
    }

    #[test]
    fn test_trail_truncated() {
        let mut s = snake_at(1000.0, 1000.0, 0.0);
        for _ in 0..100 {
            s.update(tick::DT);
        }
        assert_eq!(s.trail_len(), trail_capacity(s.length));

        s.grow(4);
        s.update(tick::DT);
        assert_eq!(s.length, snake::INITIAL_LENGTH + 4);
        assert_eq!(s.segments.len(), (snake::INITIAL_LENGTH + 4) as usize);
        assert_eq!(s.trail_len(), trail_capacity(snake::INITIAL_LENGTH) + 1);
    }

    #[test]
    fn test_kill_idempotent_and_freezes() {
        let mut s = snake_at(1000.0, 1000.0, 0.0);
        s.kill();
        s.kill();
        assert!(!s.is_alive());
        let head = s.head;
        s.update(tick::DT);
        assert_eq!(s.head, head);
    }

    #[test]
    fn test_tokens() {
        let mut s = snake_at(1000.0, 1000.0, 0.0);
        s.add_tokens(Tokens::from_micros(1_500_000));
        s.add_tokens(Tokens::from_micros(500_000));
        assert_eq!(s.take_tokens(), Tokens::from_micros(2_000_000));
        assert!(s.pellet_tokens.is_zero());
    }

    #[test]
    fn test_ignores_non_finite_target() {
        let mut s = snake_at(1000.0, 1000.0, 0.5);
        s.set_target_angle(f32::NAN);
        assert_eq!(s.target_angle, 0.5);
    }

    #[test]
    fn test_shortest_angle_delta_range() {
        assert!((shortest_angle_delta(0.0, PI) - PI).abs() < EPSILON);
        assert!((shortest_angle_delta(PI, 0.0) - PI).abs() < EPSILON);
        assert!((shortest_angle_delta(0.2, TAU - 0.2) + 0.4).abs() < EPSILON);
        assert!((shortest_angle_delta(TAU - 0.2, 0.2) - 0.4).abs() < EPSILON);
        for i in 0..64 {
            let d = shortest_angle_delta(0.0, i as f32 * 0.37);
            assert!(d > -PI && d <= PI);
        }
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(-PI / 2.0) - 3.0 * PI / 2.0).abs() < EPSILON);
        assert!((normalize_angle(TAU + 1.0) - 1.0).abs() < EPSILON);
        assert!(normalize_angle(-1e-9) < TAU);
    }
}
