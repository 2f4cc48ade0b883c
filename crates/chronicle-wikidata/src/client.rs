//! SPARQL HTTP client with bounded retry.

use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::{ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response};
use tracing::{debug, info, warn};

use chronicle_core::{Error, Result};

use crate::config::WikidataConfig;
use crate::error::{to_chronicle_error, SparqlErrorCode};
use crate::types::{SparqlResponse, SparqlResults};

/// Media type of SPARQL JSON results.
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Result of one logical query.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Results(SparqlResults),
    /// Every attempt failed transiently. Carries the last failure.
    Unavailable(String),
}

/// Client for the knowledge-base query service.
///
/// Transient failures (429, 5xx, timeouts, connection errors) are retried
/// with exponential backoff and jitter up to `max_attempts` total attempts,
/// after which [`QueryOutcome::Unavailable`] is returned instead of an error.
/// Other failures are returned immediately as `PermanentExternal`.
#[derive(Clone)]
pub struct SparqlClient {
    client: Client,
    config: WikidataConfig,
}

impl SparqlClient {
    pub fn new(config: WikidataConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "wikidata",
            component = "client",
            endpoint = %config.endpoint,
            max_attempts = config.max_attempts,
            timeout_secs = config.timeout_secs,
            retry_budget_ms = config.retry_budget().as_millis() as u64,
            "Initializing SPARQL client"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(WikidataConfig::from_env())
    }

    pub fn config(&self) -> &WikidataConfig {
        &self.config
    }

    /// Run a query, retrying transient failures.
    pub async fn query(&self, sparql: &str) -> Result<QueryOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let start = Instant::now();
            let (err, retry_after) = match self.send(sparql).await {
                Ok(results) => {
                    debug!(
                        subsystem = "wikidata",
                        attempt = attempt + 1,
                        rows = results.bindings.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "SPARQL query succeeded"
                    );
                    return Ok(QueryOutcome::Results(results));
                }
                Err(Attempt::Permanent(err)) => return Err(err),
                Err(Attempt::Transient { error, retry_after }) => (error, retry_after),
            };
            last_error = err.to_string();

            if attempt + 1 < max_attempts {
                let wait = self.backoff(attempt, retry_after);
                warn!(
                    subsystem = "wikidata",
                    attempt = attempt + 1,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %last_error,
                    "Transient query failure, backing off"
                );
                tokio::time::sleep(wait).await;
            }
        }

        warn!(
            subsystem = "wikidata",
            max_attempts,
            error = %last_error,
            "Query service unavailable after retries"
        );
        Ok(QueryOutcome::Unavailable(format!(
            "query service unavailable after {} attempts: {}",
            max_attempts, last_error
        )))
    }

    async fn send(&self, sparql: &str) -> std::result::Result<SparqlResults, Attempt> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[("query", sparql)])
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .send()
            .await
            .map_err(|e| Attempt::transient(Error::TransientExternal(e.to_string()), None))?;

        let status = response.status();
        if !status.is_success() {
            let code = SparqlErrorCode::from_status(status.as_u16());
            let retry_after = retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            let err = to_chronicle_error(code, status.as_u16(), &snippet);
            return Err(if code.is_retryable() {
                Attempt::transient(err, retry_after)
            } else {
                Attempt::Permanent(err)
            });
        }

        // A body cut off mid-stream (the service times out while streaming)
        // fails to parse and is worth another attempt.
        response
            .json::<SparqlResponse>()
            .await
            .map(|r| r.results)
            .map_err(|e| {
                Attempt::transient(
                    Error::TransientExternal(format!("malformed results: {}", e)),
                    None,
                )
            })
    }

    /// Delay before the retry following `attempt` (0-based).
    pub(crate) fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(20));
        let jitter = if self.config.backoff_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.backoff_jitter_ms)
        } else {
            0
        };
        let mut wait_ms = exp.saturating_add(jitter);
        if let Some(hint) = retry_after {
            wait_ms = wait_ms.max(hint.as_millis() as u64);
        }
        Duration::from_millis(wait_ms.min(self.config.backoff_max_ms))
    }
}

enum Attempt {
    Transient {
        error: Error,
        retry_after: Option<Duration>,
    },
    Permanent(Error),
}

impl Attempt {
    fn transient(error: Error, retry_after: Option<Duration>) -> Self {
        Self::Transient { error, retry_after }
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
