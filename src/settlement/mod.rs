//! Settlement reporting
//!
//! The simulation reports economic events (eats, deaths, token payouts) to
//! an external ledger through the [`SettlementSink`] capability. Submission
//! never blocks: the sink hands back a [`DeliveryReceipt`] that resolves once
//! the report was delivered or given up on. The tick loop only ever polls
//! receipts, it never awaits them.

pub mod client;
pub mod queue;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::game::tokens::Tokens;

pub use client::LogSettlementClient;
#[cfg(feature = "http")]
pub use client::HttpSettlementClient;
pub use queue::{KeyedRetryQueue, RetryPolicy, SettlementClient};

/// One event for the external ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettlementReport {
    Eat {
        match_id: String,
        killer: String,
        victim: String,
    },
    SelfDeath {
        match_id: String,
        identity: String,
        score: u32,
    },
    TokenSettlement {
        identity: String,
        amount: Tokens,
    },
}

impl SettlementReport {
    /// Identity whose reports must execute in submission order. Eats are
    /// serialized behind the victim, whose stake they move.
    pub fn key(&self) -> &str {
        match self {
            SettlementReport::Eat { victim, .. } => victim,
            SettlementReport::SelfDeath { identity, .. } => identity,
            SettlementReport::TokenSettlement { identity, .. } => identity,
        }
    }

    /// Short label for logs
    pub fn describe(&self) -> String {
        match self {
            SettlementReport::Eat { killer, victim, .. } => {
                format!("eat {} -> {}", short(killer), short(victim))
            }
            SettlementReport::SelfDeath {
                identity, score, ..
            } => format!("self-death {} score {}", short(identity), score),
            SettlementReport::TokenSettlement { identity, amount } => {
                format!("settle {} tokens for {}", amount, short(identity))
            }
        }
    }
}

fn short(identity: &str) -> &str {
    identity.get(..10).unwrap_or(identity)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Dropped { attempts: u32 },
}

/// Resolves when the report is finished with. A closed channel means the
/// sink went away, which callers treat as finished too.
pub type DeliveryReceipt = oneshot::Receiver<DeliveryOutcome>;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement endpoint rejected report: {0}")]
    Rejected(String),
    #[error("settlement transport failed: {0}")]
    Transport(String),
}

/// Best-effort, non-blocking sink for settlement reports
pub trait SettlementSink: Send + Sync {
    fn submit(&self, report: SettlementReport) -> DeliveryReceipt;
}

/// Sink used when no ledger is attached; every report resolves at once
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl SettlementSink for DiscardSink {
    fn submit(&self, report: SettlementReport) -> DeliveryReceipt {
        tracing::debug!("Discarding settlement report: {}", report.describe());
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(DeliveryOutcome::Delivered { attempts: 0 });
        rx
    }
}
