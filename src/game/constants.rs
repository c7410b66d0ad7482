/// World bounds
pub mod world {
    pub const WIDTH: f32 = 5000.0;
    pub const HEIGHT: f32 = 5000.0;
}

/// Simulation clock
pub mod tick {
    /// Server tick rate in Hz
    pub const RATE: u32 = 20;
    /// Tick duration in milliseconds
    pub const DURATION_MS: u64 = 1000 / RATE as u64;
    /// Nominal delta time per tick in seconds
    pub const DT: f32 = 1.0 / RATE as f32;
    /// Elapsed time is clamped to this so a stalled scheduler cannot
    /// teleport snakes across the world
    pub const MAX_DT: f32 = 0.25;
}

/// Snake kinematics and body layout
pub mod snake {
    /// Linear speed in units per second
    pub const BASE_SPEED: f32 = 150.0;
    /// Maximum angular speed in radians per second
    pub const MAX_ROTATION_SPEED: f32 = std::f32::consts::TAU;
    /// Length of a freshly spawned snake (also the minimum)
    pub const INITIAL_LENGTH: u32 = 5;
    /// Arc-length distance between consecutive body segments
    pub const SEGMENT_SPACING: f32 = 15.0;
    pub const HEAD_RADIUS: f32 = 10.0;
    pub const SEGMENT_RADIUS: f32 = 8.0;
    /// Trail keeps at most `length * TRAIL_FACTOR` points
    pub const TRAIL_FACTOR: usize = 3;
    /// Spacing of the synthetic trail laid behind a fresh head
    pub const INITIAL_TRAIL_SPACING: f32 = 2.0;
    pub const MAX_NAME_LENGTH: usize = 16;
    pub const DEFAULT_NAME: &str = "Snake";
    pub const MAX_IDENTITY_LENGTH: usize = 64;
}

/// Consumable pellets
pub mod pellet {
    /// Pellets created per field generation
    pub const COUNT: usize = 200;
    pub const MIN_SIZE: f32 = 4.0;
    pub const MAX_SIZE: f32 = 8.0;
    /// Session token budget is `pellet_count * players / TOKEN_DIVISOR`
    pub const TOKEN_DIVISOR: f64 = 300.0;
    pub const COLORS: [&str; 10] = [
        "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
        "#F8B739", "#52B788",
    ];
}

/// Collision thresholds
pub mod collision {
    /// Head-to-segment (and head-to-head) kill distance
    pub const DISTANCE: f32 = 18.0;
    /// Own segments skipped when a snake scans its own body
    pub const SELF_GRACE_SEGMENTS: usize = 3;
}

/// Spawn placement
pub mod spawn {
    /// Distance from each world edge kept free of spawns
    pub const MARGIN: f32 = 500.0;
    /// Minimum distance from any alive head
    pub const MIN_DISTANCE: f32 = 200.0;
    /// Retry budget before accepting a crowded position
    pub const MAX_RETRIES: u32 = 10;
}

/// Per-subscriber state-diff synchronization
pub mod sync {
    /// A subscriber missing more ticks than this gets a full snapshot
    pub const MAX_MISSED_TICKS: u64 = 5;
    /// Head movement (per axis) that marks a snake as updated
    pub const HEAD_EPSILON: f32 = 1.0;
    /// Heading change (radians) that marks a snake as updated
    pub const ANGLE_EPSILON: f32 = 0.1;
}

/// Leaderboard ranking
pub mod leaderboard {
    pub const SIZE: usize = 5;
}

/// Settlement sink retry policy
pub mod settlement {
    use std::time::Duration;

    pub const MAX_ATTEMPTS: u32 = 3;
    /// Attempt `n` waits `n * RETRY_DELAY` before retrying
    pub const RETRY_DELAY: Duration = Duration::from_millis(2000);
    /// Per-identity worker exits after this long without work
    pub const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
}

/// External seed delivery
pub mod entropy {
    use std::time::Duration;

    /// Time to wait for a seed before settling into fallback mode
    pub const TIMEOUT: Duration = Duration::from_secs(60);
    pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
    pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);
}

/// Network limits
pub mod network {
    /// Largest frame accepted from a client
    pub const MAX_CLIENT_MESSAGE_SIZE: usize = 4 * 1024;
    /// Largest frame the server will emit (full snapshots of a crowded arena)
    pub const MAX_SERVER_MESSAGE_SIZE: usize = 1024 * 1024;
    /// Frames buffered per subscriber before it is treated as lagging
    pub const OUTBOUND_QUEUE_DEPTH: usize = 32;
    /// Target-angle updates buffered between ticks (latest wins)
    pub const INPUT_QUEUE_CAPACITY: usize = 4096;
}
