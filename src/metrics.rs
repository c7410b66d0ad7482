//! Prometheus-compatible metrics endpoint
//!
//! Exposes arena server metrics in Prometheus text format and as JSON.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::game::state::EntropyMode;
use crate::settlement::DeliveryOutcome;

const TICK_HISTORY: usize = 1000;

/// Metrics registry for the arena server
#[derive(Debug)]
pub struct Metrics {
    // Simulation
    pub snakes_total: AtomicU64,
    pub snakes_alive: AtomicU64,
    pub pellets_remaining: AtomicU64,
    pub deaths_total: AtomicU64,
    pub pellets_eaten_total: AtomicU64,
    /// 0 = pending, 1 = seeded, 2 = fallback
    pub entropy_mode: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    // Network
    pub connections_active: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub full_states_sent: AtomicU64,
    pub delta_states_sent: AtomicU64,
    pub outbound_dropped: AtomicU64,

    // Settlement
    pub settlement_delivered: AtomicU64,
    pub settlement_retried: AtomicU64,
    pub settlement_dropped: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            snakes_total: AtomicU64::new(0),
            snakes_alive: AtomicU64::new(0),
            pellets_remaining: AtomicU64::new(0),
            deaths_total: AtomicU64::new(0),
            pellets_eaten_total: AtomicU64::new(0),
            entropy_mode: AtomicU64::new(2),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            full_states_sent: AtomicU64::new(0),
            delta_states_sent: AtomicU64::new(0),
            outbound_dropped: AtomicU64::new(0),
            settlement_delivered: AtomicU64::new(0),
            settlement_retried: AtomicU64::new(0),
            settlement_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            drop(history);
            sorted.sort_unstable();
            let at = |q: f32| sorted[((sorted.len() as f32 * q) as usize).min(sorted.len() - 1)];

            self.tick_time_p95_us.store(at(0.95), Ordering::Relaxed);
            self.tick_time_p99_us.store(at(0.99), Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn record_entropy_mode(&self, mode: EntropyMode) {
        let code = match mode {
            EntropyMode::Pending => 0,
            EntropyMode::Seeded => 1,
            EntropyMode::Fallback => 2,
        };
        self.entropy_mode.store(code, Ordering::Relaxed);
    }

    pub fn record_sent(&self, bytes: usize, full: bool) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        if full {
            self.full_states_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.delta_states_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_settlement(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered { .. } => &self.settlement_delivered,
            DeliveryOutcome::Dropped { .. } => &self.settlement_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settlement_retry(&self) {
        self.settlement_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn entropy_mode_name(&self) -> &'static str {
        match self.entropy_mode.load(Ordering::Relaxed) {
            0 => "pending",
            1 => "seeded",
            _ => "fallback",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Simulation
        metric!("slither_arena_snakes_total", "Snakes in the session", "gauge",
            self.snakes_total.load(Ordering::Relaxed));
        metric!("slither_arena_snakes_alive", "Alive snakes", "gauge",
            self.snakes_alive.load(Ordering::Relaxed));
        metric!("slither_arena_pellets_remaining", "Pellets left in the field", "gauge",
            self.pellets_remaining.load(Ordering::Relaxed));
        metric!("slither_arena_deaths_total", "Snake deaths", "counter",
            self.deaths_total.load(Ordering::Relaxed));
        metric!("slither_arena_pellets_eaten_total", "Pellets consumed", "counter",
            self.pellets_eaten_total.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP slither_arena_entropy_state World generation source\n# TYPE slither_arena_entropy_state gauge\nslither_arena_entropy_state{{mode=\"{}\"}} 1\n",
            self.entropy_mode_name()
        ));

        // Performance
        metric!("slither_arena_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("slither_arena_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("slither_arena_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("slither_arena_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("slither_arena_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        // Network
        metric!("slither_arena_connections_active", "Active WebTransport connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("slither_arena_messages_sent_total", "Total messages sent", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("slither_arena_messages_received_total", "Total messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("slither_arena_bytes_sent_total", "Total bytes sent", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("slither_arena_bytes_received_total", "Total bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("slither_arena_full_states_total", "Full snapshots sent", "counter",
            self.full_states_sent.load(Ordering::Relaxed));
        metric!("slither_arena_delta_states_total", "Delta snapshots sent", "counter",
            self.delta_states_sent.load(Ordering::Relaxed));
        metric!("slither_arena_outbound_dropped_total", "Frames dropped for lagging subscribers", "counter",
            self.outbound_dropped.load(Ordering::Relaxed));

        // Settlement
        metric!("slither_arena_settlement_delivered_total", "Settlement reports delivered", "counter",
            self.settlement_delivered.load(Ordering::Relaxed));
        metric!("slither_arena_settlement_retried_total", "Settlement attempts retried", "counter",
            self.settlement_retried.load(Ordering::Relaxed));
        metric!("slither_arena_settlement_dropped_total", "Settlement reports dropped", "counter",
            self.settlement_dropped.load(Ordering::Relaxed));

        metric!("slither_arena_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON form of the same counters
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        serde_json::json!({
            "simulation": {
                "snakes": load(&self.snakes_total),
                "alive": load(&self.snakes_alive),
                "pellets": load(&self.pellets_remaining),
                "deaths": load(&self.deaths_total),
                "pellets_eaten": load(&self.pellets_eaten_total),
                "entropy": self.entropy_mode_name(),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
            },
            "network": {
                "connections": load(&self.connections_active),
                "messages_sent": load(&self.messages_sent),
                "messages_received": load(&self.messages_received),
                "bytes_sent": load(&self.bytes_sent),
                "bytes_received": load(&self.bytes_received),
                "full_states": load(&self.full_states_sent),
                "delta_states": load(&self.delta_states_sent),
                "outbound_dropped": load(&self.outbound_dropped),
            },
            "settlement": {
                "delivered": load(&self.settlement_delivered),
                "retried": load(&self.settlement_retried),
                "dropped": load(&self.settlement_dropped),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    // Most specific paths first
                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
