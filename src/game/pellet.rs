//! Pellet field
//!
//! Pellets are created in bulk, never respawn, and are only ever removed.
//! Ids are allocated by the caller from a session-wide counter so a
//! replacement field never reuses an id a client may still remember.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::game::tokens::Tokens;
use crate::util::Vec2;

pub type PelletId = u64;

/// Placement of one pellet before ids and tokens are assigned
#[derive(Debug, Clone, PartialEq)]
pub struct PelletSeed {
    pub position: Vec2,
    pub size: f32,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pellet {
    pub id: PelletId,
    pub position: Vec2,
    pub size: f32,
    pub color: &'static str,
    pub tokens: Tokens,
}

/// How the field was laid out; fixed for the field's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Deterministic,
    Randomized,
}

#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    #[error("tokens already distributed across this field")]
    AlreadyDistributed,
    #[error("field has no pellets to carry tokens")]
    Empty,
}

/// Pellet sizes are weighted in thousandths so shares are integer math
const WEIGHT_SCALE: f32 = 1000.0;

#[derive(Debug, Clone)]
pub struct PelletField {
    pellets: BTreeMap<PelletId, Pellet>,
    mode: FieldMode,
    distributed: Option<Tokens>,
}

impl PelletField {
    /// Lay out `seeds` with ids starting at `first_id`
    pub fn new(mode: FieldMode, seeds: Vec<PelletSeed>, first_id: PelletId) -> Self {
        let pellets = seeds
            .into_iter()
            .zip(first_id..)
            .map(|(seed, id)| {
                (
                    id,
                    Pellet {
                        id,
                        position: seed.position,
                        size: seed.size,
                        color: seed.color,
                        tokens: Tokens::ZERO,
                    },
                )
            })
            .collect();
        Self {
            pellets,
            mode,
            distributed: None,
        }
    }

    pub fn mode(&self) -> FieldMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.pellets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pellets.is_empty()
    }

    pub fn get(&self, id: PelletId) -> Option<&Pellet> {
        self.pellets.get(&id)
    }

    /// Pellets in id order
    pub fn iter(&self) -> impl Iterator<Item = &Pellet> {
        self.pellets.values()
    }

    /// `None` for unknown (already consumed) ids
    pub fn remove(&mut self, id: PelletId) -> Option<Pellet> {
        self.pellets.remove(&id)
    }

    /// Total handed out by `distribute_tokens`, if it has run
    pub fn distributed_total(&self) -> Option<Tokens> {
        self.distributed
    }

    /// Split `total` across pellets in proportion to size. Every pellet but
    /// the last gets its floored share; the last absorbs the remainder so
    /// the assigned amounts sum to `total` exactly. Runs once per field.
    pub fn distribute_tokens(&mut self, total: Tokens) -> Result<(), DistributionError> {
        if self.distributed.is_some() {
            return Err(DistributionError::AlreadyDistributed);
        }
        if self.pellets.is_empty() {
            return Err(DistributionError::Empty);
        }

        let weights: Vec<u128> = self
            .pellets
            .values()
            .map(|p| (p.size.max(0.0) * WEIGHT_SCALE).round() as u128)
            .collect();
        let weight_sum: u128 = weights.iter().sum();
        let total_micros = u128::from(total.micros());
        let last = self.pellets.len() - 1;

        let mut assigned: u64 = 0;
        for (i, (pellet, weight)) in self.pellets.values_mut().zip(weights).enumerate() {
            let share = if i == last {
                total.micros() - assigned
            } else if weight_sum == 0 {
                0
            } else {
                // floor(total * w / W) summed over a prefix never exceeds total
                (total_micros * weight / weight_sum) as u64
            };
            pellet.tokens = Tokens::from_micros(share);
            assigned += share;
        }

        self.distributed = Some(total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds(sizes: &[f32]) -> Vec<PelletSeed> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| PelletSeed {
                position: Vec2::new(i as f32 * 10.0, 0.0),
                size,
                color: "#FF6B6B",
            })
            .collect()
    }

    #[test]
    fn test_ids_from_first_id() {
        let field = PelletField::new(FieldMode::Randomized, seeds(&[4.0, 5.0, 6.0]), 100);
        let ids: Vec<PelletId> = field.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![100, 101, 102]);
        assert_eq!(field.mode(), FieldMode::Randomized);
    }

    #[test]
    fn test_remove_is_noop_when_unknown() {
        let mut field = PelletField::new(FieldMode::Deterministic, seeds(&[4.0, 8.0]), 0);
        assert!(field.remove(1).is_some());
        assert!(field.remove(1).is_none());
        assert!(field.remove(99).is_none());
        assert_eq!(field.len(), 1);
    }

    #[test]
    fn test_distribution_sum_exact() {
        let sizes: Vec<f32> = (0..197).map(|i| 4.0 + (i % 7) as f32 * 0.613).collect();
        for micros in [1u64, 7, 999_999, 666_666_667, 123_456_789_012] {
            let mut field = PelletField::new(FieldMode::Randomized, seeds(&sizes), 0);
            let total = Tokens::from_micros(micros);
            field.distribute_tokens(total).unwrap();
            let sum: Tokens = field.iter().map(|p| p.tokens).sum();
            assert_eq!(sum, total);
        }
    }

    #[test]
    fn test_distribution_proportional_to_size() {
        let mut field = PelletField::new(FieldMode::Randomized, seeds(&[4.0, 8.0, 4.0]), 0);
        field.distribute_tokens(Tokens::from_micros(4_000_000)).unwrap();
        let shares: Vec<u64> = field.iter().map(|p| p.tokens.micros()).collect();
        assert_eq!(shares, vec![1_000_000, 2_000_000, 1_000_000]);
    }

    #[test]
    fn test_distribution_runs_once() {
        let mut field = PelletField::new(FieldMode::Randomized, seeds(&[4.0, 6.0]), 0);
        field.distribute_tokens(Tokens::from_micros(10)).unwrap();
        assert_eq!(
            field.distribute_tokens(Tokens::from_micros(99)),
            Err(DistributionError::AlreadyDistributed)
        );
        let sum: Tokens = field.iter().map(|p| p.tokens).sum();
        assert_eq!(sum, Tokens::from_micros(10));
        assert_eq!(field.distributed_total(), Some(Tokens::from_micros(10)));
    }

    #[test]
    fn test_distribution_empty_field() {
        let mut field = PelletField::new(FieldMode::Randomized, Vec::new(), 0);
        assert_eq!(
            field.distribute_tokens(Tokens::from_micros(10)),
            Err(DistributionError::Empty)
        );
    }
}
