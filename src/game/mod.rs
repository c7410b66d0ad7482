pub mod constants;
pub mod game_loop;
pub mod pellet;
pub mod rng;
pub mod snake;
pub mod state;
pub mod systems;
pub mod tokens;
