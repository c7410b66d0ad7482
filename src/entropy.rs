//! Session seed delivery
//!
//! A provider resolves the 256-bit seed for a match. The request runs as its
//! own task, bounded by a timeout, and reports back to the session through
//! the control lane: either the seed or "unavailable", which moves the
//! session to fallback randomness for good.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EntropyConfig;
use crate::game::rng::{Seed, SeedError};
use crate::net::commands::{CommandSender, SessionCommand};
use crate::util::BoxFuture;

#[derive(Debug, thiserror::Error)]
pub enum EntropyError {
    #[error("invalid seed: {0}")]
    InvalidSeed(#[from] SeedError),
    #[error("entropy source failed: {0}")]
    Source(String),
}

pub trait EntropyProvider: Send + Sync {
    /// Resolve the seed for `match_id`. May take arbitrarily long; callers
    /// bound it with a timeout.
    fn request_seed<'a>(&'a self, match_id: &'a str) -> BoxFuture<'a, Result<Seed, EntropyError>>;
}

/// Seed fixed by configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticEntropy {
    seed: Seed,
}

impl StaticEntropy {
    pub fn new(seed: Seed) -> Self {
        Self { seed }
    }

    pub fn from_hex(hex: &str) -> Result<Self, EntropyError> {
        Ok(Self::new(Seed::from_hex(hex)?))
    }
}

impl EntropyProvider for StaticEntropy {
    fn request_seed<'a>(&'a self, _match_id: &'a str) -> BoxFuture<'a, Result<Seed, EntropyError>> {
        let seed = self.seed;
        Box::pin(async move { Ok(seed) })
    }
}

/// Polls `GET {base_url}/{match_id}` until the response carries a seed
#[cfg(feature = "http")]
pub struct HttpEntropy {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http")]
#[derive(serde::Deserialize)]
struct SeedResponse {
    seed: Option<String>,
}

#[cfg(feature = "http")]
impl HttpEntropy {
    pub fn new(base_url: impl Into<String>) -> Result<Self, EntropyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EntropyError::Source(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn poll_once(&self, match_id: &str) -> Result<Option<Seed>, EntropyError> {
        let url = format!("{}/{}", self.base_url, match_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EntropyError::Source(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::ACCEPTED
        {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EntropyError::Source(format!("status {}", response.status())));
        }

        let body: SeedResponse = response
            .json()
            .await
            .map_err(|e| EntropyError::Source(e.to_string()))?;
        body.seed.map(|hex| Seed::from_hex(&hex)).transpose().map_err(Into::into)
    }
}

#[cfg(feature = "http")]
impl EntropyProvider for HttpEntropy {
    fn request_seed<'a>(&'a self, match_id: &'a str) -> BoxFuture<'a, Result<Seed, EntropyError>> {
        use crate::game::constants::entropy;

        Box::pin(async move {
            let mut delay = entropy::POLL_INTERVAL;
            loop {
                match self.poll_once(match_id).await {
                    Ok(Some(seed)) => return Ok(seed),
                    Ok(None) => debug!("Seed for {} not ready yet", match_id),
                    // A malformed seed will not fix itself
                    Err(e @ EntropyError::InvalidSeed(_)) => return Err(e),
                    Err(e) => warn!("Seed poll failed: {}", e),
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(entropy::MAX_POLL_INTERVAL);
            }
        })
    }
}

/// Pick a provider for the configuration. `None` means the session runs
/// on fallback randomness from the start.
pub fn provider_from_config(config: &EntropyConfig) -> Result<Option<Arc<dyn EntropyProvider>>, EntropyError> {
    if let Some(hex) = &config.seed {
        return Ok(Some(Arc::new(StaticEntropy::from_hex(hex)?)));
    }

    match &config.url {
        #[cfg(feature = "http")]
        Some(url) => Ok(Some(Arc::new(HttpEntropy::new(url.clone())?))),
        #[cfg(not(feature = "http"))]
        Some(url) => {
            warn!("ENTROPY_URL {} ignored: built without the `http` feature", url);
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Request the seed in the background and report the result to the session
pub fn spawn_entropy_request(
    provider: Arc<dyn EntropyProvider>,
    match_id: String,
    timeout: Duration,
    commands: CommandSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let command = match tokio::time::timeout(timeout, provider.request_seed(&match_id)).await {
            Ok(Ok(seed)) => {
                info!("Seed for match {} delivered", match_id);
                SessionCommand::SeedDelivered(seed)
            }
            Ok(Err(e)) => {
                warn!("Seed request for match {} failed: {}", match_id, e);
                SessionCommand::EntropyUnavailable
            }
            Err(_) => {
                warn!("No seed for match {} within {:?}", match_id, timeout);
                SessionCommand::EntropyUnavailable
            }
        };

        if commands.send(command).is_err() {
            debug!("Session stopped before the seed request finished");
        }
    })
}
