//! Collision detection
//!
//! Pure functions over one tick's alive snakes and pellets. Nothing here
//! mutates state; the game loop applies the results in the order returned.
//!
//! Detection follows snake iteration order and is deliberately asymmetric:
//! when two bodies could kill each other in one tick, the snake scanned first
//! is recorded as the victim of the other, and the later record is applied
//! against a killer that is already dead.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::config::WorldConfig;
use crate::game::constants::{collision, snake as snake_consts};
use crate::game::pellet::{PelletField, PelletId};
use crate::game::snake::{Snake, SnakeId};

/// A snake's head reached a pellet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PelletPickup {
    pub snake_id: SnakeId,
    pub pellet_id: PelletId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Two heads met; neither is credited
    HeadOn,
    /// Head ran into another snake's body
    Body,
    /// Head ran into its own body past the grace window
    SelfBody,
    /// Head left the world
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collision {
    pub victim: SnakeId,
    /// `None` for self, head-on and boundary deaths
    pub killer: Option<SnakeId>,
    pub kind: CollisionKind,
}

pub type Collisions = SmallVec<[Collision; 8]>;

/// Pellets whose center is closer to a head than `HEAD_RADIUS + size`.
/// Each pellet is credited to the first snake (in iteration order) that
/// reaches it; later snakes skip ids already consumed this tick.
pub fn detect_pellet_pickups(snakes: &[&Snake], pellets: &PelletField) -> Vec<PelletPickup> {
    let mut consumed: FxHashSet<PelletId> = FxHashSet::default();
    let mut pickups = Vec::new();

    for snake in snakes.iter().filter(|s| s.is_alive()) {
        for pellet in pellets.iter() {
            if consumed.contains(&pellet.id) {
                continue;
            }
            let reach = snake_consts::HEAD_RADIUS + pellet.size;
            if snake.head.distance_sq_to(pellet.position) < reach * reach {
                consumed.insert(pellet.id);
                pickups.push(PelletPickup {
                    snake_id: snake.id,
                    pellet_id: pellet.id,
                });
            }
        }
    }

    pickups
}

/// Head-on and head-to-body collisions. Every victim appears at most once.
pub fn detect_snake_collisions(snakes: &[&Snake]) -> Collisions {
    let alive: SmallVec<[&Snake; 32]> = snakes.iter().copied().filter(|s| s.is_alive()).collect();
    let threshold_sq = collision::DISTANCE * collision::DISTANCE;
    let mut found = Collisions::new();

    let recorded = |found: &Collisions, id: SnakeId| found.iter().any(|c| c.victim == id);

    // Heads meeting: both die, no one is credited
    for (i, a) in alive.iter().enumerate() {
        for b in alive.iter().skip(i + 1) {
            if a.head.distance_sq_to(b.head) < threshold_sq {
                for victim in [a.id, b.id] {
                    if !recorded(&found, victim) {
                        found.push(Collision {
                            victim,
                            killer: None,
                            kind: CollisionKind::HeadOn,
                        });
                    }
                }
            }
        }
    }

    'victims: for victim in alive.iter() {
        if recorded(&found, victim.id) {
            continue;
        }
        for other in alive.iter() {
            let own = other.id == victim.id;
            let skip = if own { collision::SELF_GRACE_SEGMENTS } else { 0 };
            let hit = other
                .segments
                .iter()
                .skip(skip)
                .any(|seg| victim.head.distance_sq_to(*seg) < threshold_sq);
            if hit {
                found.push(Collision {
                    victim: victim.id,
                    killer: if own { None } else { Some(other.id) },
                    kind: if own {
                        CollisionKind::SelfBody
                    } else {
                        CollisionKind::Body
                    },
                });
                continue 'victims;
            }
        }
    }

    found
}

/// Snakes whose head circle crosses a world edge
pub fn detect_boundary(snakes: &[&Snake], world: &WorldConfig) -> SmallVec<[SnakeId; 4]> {
    let r = snake_consts::HEAD_RADIUS;
    snakes
        .iter()
        .filter(|s| s.is_alive())
        .filter(|s| {
            s.head.x - r < 0.0
                || s.head.x + r > world.width
                || s.head.y - r < 0.0
                || s.head.y + r > world.height
        })
        .map(|s| s.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::pellet::{FieldMode, PelletSeed};
    use crate::game::constants::tick;
    use crate::util::Vec2;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn snake(id: SnakeId, x: f32, y: f32, angle: f32) -> Snake {
        Snake::new(id, format!("s{}", id), None, Vec2::new(x, y), angle, "#fff".into())
    }

    fn field(points: &[(f32, f32, f32)]) -> PelletField {
        let seeds = points
            .iter()
            .map(|&(x, y, size)| PelletSeed {
                position: Vec2::new(x, y),
                size,
                color: "#4ECDC4",
            })
            .collect();
        PelletField::new(FieldMode::Deterministic, seeds, 0)
    }

    #[test]
    fn test_pellet_pickup_radius() {
        let s = snake(1, 1000.0, 1000.0, 0.0);
        // reach = 10 + 8 = 18
        let pellets = field(&[(1017.0, 1000.0, 8.0), (1019.0, 1000.0, 8.0)]);
        let pickups = detect_pellet_pickups(&[&s], &pellets);
        assert_eq!(
            pickups,
            vec![PelletPickup {
                snake_id: 1,
                pellet_id: 0
            }]
        );
    }

    #[test]
    fn test_pellet_credited_once() {
        let a = snake(1, 1000.0, 1000.0, 0.0);
        let b = snake(2, 1010.0, 1000.0, PI);
        let pellets = field(&[(1005.0, 1000.0, 6.0)]);
        let pickups = detect_pellet_pickups(&[&a, &b], &pellets);
        assert_eq!(pickups.len(), 1);
        assert_eq!(pickups[0].snake_id, 1);
    }

    #[test]
    fn test_dead_snakes_ignored() {
        let mut a = snake(1, 1000.0, 1000.0, 0.0);
        a.kill();
        let pellets = field(&[(1000.0, 1000.0, 6.0)]);
        assert!(detect_pellet_pickups(&[&a], &pellets).is_empty());
        assert!(detect_snake_collisions(&[&a, &a.clone()]).is_empty());
    }

    #[test]
    fn test_head_on_kills_both_without_killer() {
        let a = snake(1, 1000.0, 1000.0, 0.0);
        let b = snake(2, 1010.0, 1000.0, PI);
        let found = detect_snake_collisions(&[&a, &b]);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|c| c.killer.is_none() && c.kind == CollisionKind::HeadOn));
    }

    #[test]
    fn test_body_hit_records_killer() {
        // B lies across A's path; A's head touches B's body
        let b = snake(2, 1000.0, 1000.0, FRAC_PI_2);
        let a = snake(1, 995.0, 980.0, 0.0);
        let found = detect_snake_collisions(&[&a, &b]);
        assert_eq!(
            found.as_slice(),
            &[Collision {
                victim: 1,
                killer: Some(2),
                kind: CollisionKind::Body
            }]
        );
    }

    #[test]
    fn test_mutual_body_hit_is_order_dependent() {
        let mut a = snake(1, 1000.0, 1000.0, 0.0);
        let mut b = snake(2, 1100.0, 1100.0, 0.0);
        // Place each head on the other's body without heads meeting
        a.segments = vec![Vec2::new(500.0, 500.0), Vec2::new(1100.0, 1105.0)];
        b.segments = vec![Vec2::new(600.0, 600.0), Vec2::new(1000.0, 1005.0)];

        let ab = detect_snake_collisions(&[&a, &b]);
        assert_eq!(ab[0].victim, 1);
        assert_eq!(ab[0].killer, Some(2));
        assert_eq!(ab[1].victim, 2);
        assert_eq!(ab[1].killer, Some(1));

        let ba = detect_snake_collisions(&[&b, &a]);
        assert_eq!(ba[0].victim, 2);
        assert_eq!(ba[1].victim, 1);
    }

    #[test]
    fn test_self_grace_window() {
        let mut s = snake(1, 1000.0, 1000.0, 0.0);
        // Tight circling: fresh snake never hits its own first segments
        s.set_target_angle(PI);
        for _ in 0..200 {
            s.update(tick::DT);
            let rotated = s.angle + FRAC_PI_2;
            s.set_target_angle(rotated);
            assert!(detect_snake_collisions(&[&s]).is_empty());
        }
    }

    #[test]
    fn test_self_collision_past_grace() {
        let mut s = snake(1, 1000.0, 1000.0, 0.0);
        s.grow(10);
        s.segments = (0..15).map(|i| Vec2::new(2000.0 + i as f32, 2000.0)).collect();
        s.segments[3] = s.head;
        let found = detect_snake_collisions(&[&s]);
        assert_eq!(found[0].kind, CollisionKind::SelfBody);
        assert_eq!(found[0].killer, None);

        s.segments[3] = Vec2::new(3000.0, 3000.0);
        s.segments[2] = s.head;
        assert!(detect_snake_collisions(&[&s]).is_empty());
    }

    #[test]
    fn test_boundary() {
        let world = WorldConfig::default();
        let inside = snake(1, 10.0, 2500.0, 0.0);
        let left = snake(2, 9.0, 2500.0, 0.0);
        let bottom = snake(3, 2500.0, world.height - 5.0, 0.0);
        let found = detect_boundary(&[&inside, &left, &bottom], &world);
        assert_eq!(found.as_slice(), &[2, 3]);
    }
}
