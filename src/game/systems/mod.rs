pub mod collision;
pub mod leaderboard;
