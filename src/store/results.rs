//! Client for the result persistence endpoint

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Which context a finished game belonged to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameType {
    Matchmaking,
    Room,
    Tournament,
}

/// One concluded match, as sent to the persistence endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub winner_email: String,
    pub loser_email: String,
    pub game_type: GameType,
    pub game_id: Uuid,
}

/// Posts match results. Without a URL results are only logged.
#[derive(Clone)]
pub struct ResultReporter {
    client: Client,
    url: Option<String>,
    api_key: Option<String>,
}

impl ResultReporter {
    pub fn new(config: &Config) -> Self {
        Self::with_endpoint(config.results_url.clone(), config.results_api_key.clone())
    }

    pub fn with_endpoint(url: Option<String>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, url, api_key }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// POST one result
    pub async fn report(&self, result: &MatchResult) -> Result<(), ResultsError> {
        let Some(url) = self.url.as_deref() else {
            info!(
                game_id = %result.game_id,
                game_type = ?result.game_type,
                winner = %result.winner_email,
                loser = %result.loser_email,
                "Match result (no results endpoint configured)"
            );
            return Ok(());
        };

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(result);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(ResultsError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ResultsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!(game_id = %result.game_id, "Match result persisted");
        Ok(())
    }
}

/// Drain the result channel until every sender is gone. Failures are logged, never retried.
pub async fn run_reporter(reporter: ResultReporter, mut rx: mpsc::UnboundedReceiver<MatchResult>) {
    info!(enabled = reporter.is_enabled(), "Result reporter started");

    while let Some(result) = rx.recv().await {
        if let Err(e) = reporter.report(&result).await {
            match e {
                ResultsError::Api { status, .. } if status < 500 => {
                    error!(game_id = %result.game_id, error = %e, "Result rejected by persistence endpoint");
                }
                _ => {
                    warn!(game_id = %result.game_id, error = %e, "Failed to persist match result");
                }
            }
        }
    }

    info!("Result reporter stopped");
}

/// Persistence endpoint errors
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_result_serializes_camel_case() {
        let result = MatchResult {
            winner_email: "a@x.io".to_string(),
            loser_email: "b@x.io".to_string(),
            game_type: GameType::Tournament,
            game_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["winnerEmail"], "a@x.io");
        assert_eq!(json["loserEmail"], "b@x.io");
        assert_eq!(json["gameType"], "Tournament");
        assert_eq!(json["gameId"], Uuid::nil().to_string());
    }

    #[tokio::test]
    async fn test_report_without_endpoint_is_logged_only() {
        let reporter = ResultReporter::with_endpoint(None, None);
        assert!(!reporter.is_enabled());
        let result = MatchResult {
            winner_email: "a@x.io".to_string(),
            loser_email: "b@x.io".to_string(),
            game_type: GameType::Room,
            game_id: Uuid::new_v4(),
        };
        assert_ok!(reporter.report(&result).await);
    }

    #[tokio::test]
    async fn test_reporter_stops_when_senders_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(MatchResult {
            winner_email: "a@x.io".to_string(),
            loser_email: "b@x.io".to_string(),
            game_type: GameType::Matchmaking,
            game_id: Uuid::new_v4(),
        })
        .unwrap();
        drop(tx);

        let handle = tokio::spawn(run_reporter(ResultReporter::with_endpoint(None, None), rx));
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), handle).await);
    }
}
