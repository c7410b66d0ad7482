use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants;
use crate::game::rng::Seed;

/// World dimensions and pellet budget for the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    /// Pellets created when the field is (re)generated
    pub pellet_count: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: constants::world::WIDTH,
            height: constants::world::HEIGHT,
            pellet_count: constants::pellet::COUNT,
        }
    }
}

/// Retry policy for the settlement queue
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// HTTP endpoint receiving reports (requires the `http` feature)
    pub endpoint: Option<String>,
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` waits `n * retry_delay`
    pub retry_delay: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_attempts: constants::settlement::MAX_ATTEMPTS,
            retry_delay: constants::settlement::RETRY_DELAY,
        }
    }
}

/// Where the session seed comes from
#[derive(Debug, Clone)]
pub struct EntropyConfig {
    /// Fixed seed, hex encoded
    pub seed: Option<String>,
    /// Polling endpoint (requires the `http` feature)
    pub url: Option<String>,
    pub timeout: Duration,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            seed: None,
            url: None,
            timeout: constants::entropy::TIMEOUT,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Port for the metrics HTTP endpoint
    pub metrics_port: u16,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Maximum concurrent WebTransport sessions
    pub max_connections: usize,
    /// Identifier of the single long-lived match
    pub match_id: String,
    /// Path to TLS certificate file
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file
    pub tls_key_path: Option<String>,
    pub world: WorldConfig,
    pub entropy: EntropyConfig,
    pub settlement: SettlementConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            metrics_port: 9090,
            tick_rate: constants::tick::RATE,
            max_connections: 500,
            match_id: format!("match-{}", uuid::Uuid::new_v4()),
            tls_cert_path: None,
            tls_key_path: None,
            world: WorldConfig::default(),
            entropy: EntropyConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }
}

/// Read and parse an environment variable, warning (and yielding `None`)
/// when it is present but malformed or rejected by `accept`.
fn env_parse<T: FromStr>(key: &str, accept: impl Fn(&T) -> bool, rule: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) if accept(&value) => Some(value),
        Ok(_) => {
            tracing::warn!("{} must be {}, using default", key, rule);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<IpAddr>("SERVER_HOST", |_| true, "an IP address") {
            config.bind_address = addr;
        }
        if let Some(port) = env_parse::<u16>("SERVER_PORT", |p| *p > 0, "> 0") {
            config.port = port;
        }
        if let Some(port) = env_parse::<u16>("METRICS_PORT", |p| *p > 0, "> 0") {
            config.metrics_port = port;
        }
        if let Some(rate) = env_parse::<u32>("TICK_RATE", |r| (1..=120).contains(r), "1-120") {
            config.tick_rate = rate;
        }
        if let Some(max) =
            env_parse::<usize>("MAX_CONNECTIONS", |m| (1..=10_000).contains(m), "1-10000")
        {
            config.max_connections = max;
        }
        if let Some(match_id) = env_string("MATCH_ID") {
            config.match_id = match_id;
        }

        config.tls_cert_path = env_string("TLS_CERT_PATH");
        config.tls_key_path = env_string("TLS_KEY_PATH");

        if let Some(w) = env_parse::<f32>("WORLD_WIDTH", |w| *w >= 1000.0, ">= 1000") {
            config.world.width = w;
        }
        if let Some(h) = env_parse::<f32>("WORLD_HEIGHT", |h| *h >= 1000.0, ">= 1000") {
            config.world.height = h;
        }
        if let Some(count) =
            env_parse::<usize>("PELLET_COUNT", |c| (1..=100_000).contains(c), "1-100000")
        {
            config.world.pellet_count = count;
        }

        config.entropy.seed = env_string("ENTROPY_SEED");
        config.entropy.url = env_string("ENTROPY_URL");
        if let Some(secs) = env_parse::<u64>("ENTROPY_TIMEOUT_SECS", |s| *s > 0, "> 0") {
            config.entropy.timeout = Duration::from_secs(secs);
        }

        config.settlement.endpoint = env_string("SETTLEMENT_URL");
        if let Some(attempts) =
            env_parse::<u32>("SETTLEMENT_MAX_ATTEMPTS", |a| (1..=10).contains(a), "1-10")
        {
            config.settlement.max_attempts = attempts;
        }
        if let Some(ms) = env_parse::<u64>("SETTLEMENT_RETRY_DELAY_MS", |_| true, "a number") {
            config.settlement.retry_delay = Duration::from_millis(ms);
        }

        config
    }

    /// Tick interval derived from `tick_rate`
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate.max(1)))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.port == self.metrics_port {
            return Err("metrics_port must differ from port".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.match_id.is_empty() {
            return Err("match_id cannot be empty".to_string());
        }
        let margin = constants::spawn::MARGIN * 2.0;
        if self.world.width <= margin || self.world.height <= margin {
            return Err(format!("world must be larger than {} in both axes", margin));
        }
        if self.settlement.max_attempts == 0 {
            return Err("settlement max_attempts must be at least 1".to_string());
        }
        if let Some(seed) = &self.entropy.seed {
            Seed::from_hex(seed).map_err(|e| format!("ENTROPY_SEED: {}", e))?;
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.world.pellet_count, 200);
        assert_eq!(config.settlement.max_attempts, 3);
        assert!(config.match_id.starts_with("match-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tick_interval() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_validate_rejects_bad_seed() {
        let mut config = ServerConfig::default();
        config.entropy.seed = Some("0x1234".to_string());
        assert!(config.validate().is_err());

        config.entropy.seed = Some(format!("0x{}", "ab".repeat(32)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_half_tls() {
        let mut config = ServerConfig::default();
        config.tls_cert_path = Some("cert.pem".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tiny_world() {
        let mut config = ServerConfig::default();
        config.world.width = 800.0;
        assert!(config.validate().is_err());
    }
}
