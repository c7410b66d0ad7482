//! Leaderboard ranking over alive snakes

use serde::{Deserialize, Serialize};

use crate::game::snake::Snake;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub score: u32,
    pub identity: Option<String>,
}

/// Top `size` alive snakes by score, descending. Equal scores rank the
/// lower snake id (earlier join) first.
pub fn compute<'a>(snakes: impl IntoIterator<Item = &'a Snake>, size: usize) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<&Snake> = snakes.into_iter().filter(|s| s.is_alive()).collect();
    ranked.sort_by(|a, b| b.score().cmp(&a.score()).then(a.id.cmp(&b.id)));
    ranked
        .into_iter()
        .take(size)
        .map(|s| LeaderboardEntry {
            name: s.name.clone(),
            score: s.score(),
            identity: s.identity.clone(),
        })
        .collect()
}
