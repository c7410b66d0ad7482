//! Settlement clients: one delivery attempt each, retries live in the queue

use super::queue::{BoxFuture, SettlementClient};
use super::{SettlementError, SettlementReport};

/// Writes each report to the log as JSON and reports success. Used when no
/// ledger endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSettlementClient;

impl SettlementClient for LogSettlementClient {
    fn deliver<'a>(&'a self, report: &'a SettlementReport) -> BoxFuture<'a, Result<(), SettlementError>> {
        Box::pin(async move {
            let body = serde_json::to_string(report)
                .map_err(|e| SettlementError::Rejected(e.to_string()))?;
            tracing::info!(target: "settlement", "{}", body);
            Ok(())
        })
    }
}

/// Posts reports as JSON to an HTTP endpoint
#[cfg(feature = "http")]
pub struct HttpSettlementClient {
    client: reqwest::Client,
    endpoint: String,
}

#[cfg(feature = "http")]
impl HttpSettlementClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SettlementError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| SettlementError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[cfg(feature = "http")]
#[derive(serde::Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    report: &'a SettlementReport,
    submitted_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(feature = "http")]
impl SettlementClient for HttpSettlementClient {
    fn deliver<'a>(&'a self, report: &'a SettlementReport) -> BoxFuture<'a, Result<(), SettlementError>> {
        Box::pin(async move {
            let envelope = Envelope {
                report,
                submitted_at: chrono::Utc::now(),
            };
            let response = self
                .client
                .post(&self.endpoint)
                .json(&envelope)
                .send()
                .await
                .map_err(|e| SettlementError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = response.text().await.unwrap_or_default();
                Err(SettlementError::Rejected(format!("{}: {}", status, body)))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tokens::Tokens;

    #[tokio::test]
    async fn test_log_client_accepts() {
        let report = SettlementReport::TokenSettlement {
            identity: "0xabc".into(),
            amount: Tokens::from_micros(1_250_000),
        };
        assert!(LogSettlementClient.deliver(&report).await.is_ok());
    }
}
