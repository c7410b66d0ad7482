//! Keyed bounded-retry queue
//!
//! Reports sharing a key (an external identity) run one at a time in
//! submission order on a dedicated worker task; different keys proceed
//! independently. Each report gets `max_attempts` tries with linear backoff
//! and is then dropped with a warning. Workers retire after sitting idle.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::{DeliveryOutcome, DeliveryReceipt, SettlementError, SettlementReport, SettlementSink};
use crate::config::SettlementConfig;
use crate::game::constants::settlement;
use crate::metrics::Metrics;

pub use crate::util::BoxFuture;

/// Performs a single delivery attempt
pub trait SettlementClient: Send + Sync + 'static {
    fn deliver<'a>(&'a self, report: &'a SettlementReport) -> BoxFuture<'a, Result<(), SettlementError>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` failing waits `n * base_delay`
    pub base_delay: Duration,
    pub idle_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: settlement::MAX_ATTEMPTS,
            base_delay: settlement::RETRY_DELAY,
            idle_timeout: settlement::WORKER_IDLE_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_delay,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

struct Job {
    report: SettlementReport,
    done: oneshot::Sender<DeliveryOutcome>,
}

struct Inner<C> {
    client: C,
    policy: RetryPolicy,
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    runtime: Handle,
    metrics: Option<Arc<Metrics>>,
}

pub struct KeyedRetryQueue<C> {
    inner: Arc<Inner<C>>,
}

impl<C: SettlementClient> KeyedRetryQueue<C> {
    pub fn new(client: C, policy: RetryPolicy, runtime: Handle) -> Self {
        Self::build(client, policy, runtime, None)
    }

    pub fn with_metrics(client: C, policy: RetryPolicy, runtime: Handle, metrics: Arc<Metrics>) -> Self {
        Self::build(client, policy, runtime, Some(metrics))
    }

    fn build(client: C, policy: RetryPolicy, runtime: Handle, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                policy,
                workers: Mutex::new(HashMap::new()),
                runtime,
                metrics,
            }),
        }
    }

    /// Keys with a live worker
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    fn enqueue(&self, report: SettlementReport) -> DeliveryReceipt {
        let key = report.key().to_lowercase();
        let (done, receipt) = oneshot::channel();
        let mut job = Job { report, done };

        let mut workers = self.inner.workers.lock();
        if let Some(sender) = workers.get(&key) {
            match sender.send(job) {
                Ok(()) => return receipt,
                // Worker already gone; start a new one below
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(job).is_err() {
            return receipt;
        }
        workers.insert(key.clone(), tx);
        drop(workers);

        tracing::debug!("Starting settlement worker for {}", key);
        self.inner
            .runtime
            .spawn(run_worker(Arc::clone(&self.inner), key, rx));
        receipt
    }
}

impl<C: SettlementClient> SettlementSink for KeyedRetryQueue<C> {
    fn submit(&self, report: SettlementReport) -> DeliveryReceipt {
        self.enqueue(report)
    }
}

async fn run_worker<C: SettlementClient>(
    inner: Arc<Inner<C>>,
    key: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    loop {
        let job = match tokio::time::timeout(inner.policy.idle_timeout, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(_) => match take_or_retire(&inner, &key, &mut rx) {
                Some(job) => job,
                None => return,
            },
        };
        deliver_with_retry(&inner, job).await;
    }
}

/// Senders enqueue while holding the worker map lock, so checking the
/// channel under that lock cannot miss a job.
fn take_or_retire<C>(inner: &Inner<C>, key: &str, rx: &mut mpsc::UnboundedReceiver<Job>) -> Option<Job> {
    let mut workers = inner.workers.lock();
    match rx.try_recv() {
        Ok(job) => Some(job),
        Err(_) => {
            workers.remove(key);
            tracing::debug!("Settlement worker for {} retired", key);
            None
        }
    }
}

async fn deliver_with_retry<C: SettlementClient>(inner: &Inner<C>, job: Job) {
    let policy = inner.policy;
    let label = job.report.describe();
    let mut attempt = 1;

    let outcome = loop {
        match inner.client.deliver(&job.report).await {
            Ok(()) => {
                tracing::info!("Settlement delivered: {} (attempt {})", label, attempt);
                break DeliveryOutcome::Delivered { attempts: attempt };
            }
            Err(e) if attempt < policy.max_attempts => {
                let wait = policy.backoff(attempt);
                tracing::warn!(
                    "Settlement attempt {}/{} failed for {}: {}; retrying in {:?}",
                    attempt,
                    policy.max_attempts,
                    label,
                    e,
                    wait
                );
                if let Some(metrics) = &inner.metrics {
                    metrics.record_settlement_retry();
                }
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "Dropping settlement report {} after {} attempts: {}",
                    label,
                    attempt,
                    e
                );
                break DeliveryOutcome::Dropped { attempts: attempt };
            }
        }
    };

    if let Some(metrics) = &inner.metrics {
        metrics.record_settlement(outcome);
    }
    let _ = job.done.send(outcome);
}
