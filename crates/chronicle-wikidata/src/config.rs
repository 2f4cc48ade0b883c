//! Knowledge-base client configuration.

use std::time::Duration;

use chronicle_core::defaults;

/// Configuration for the SPARQL client.
#[derive(Debug, Clone)]
pub struct WikidataConfig {
    /// SPARQL endpoint URL.
    pub endpoint: String,
    /// Descriptive client identifier sent as `User-Agent`.
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts per query, including the first.
    pub max_attempts: u32,
    /// Base of the exponential backoff in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound of the random jitter in milliseconds.
    pub backoff_jitter_ms: u64,
    /// Longest single wait in milliseconds.
    pub backoff_max_ms: u64,
    /// Rows requested per identity lookup.
    pub identity_limit: usize,
}

impl Default for WikidataConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::WIKIDATA_ENDPOINT.to_string(),
            user_agent: defaults::WIKIDATA_USER_AGENT.to_string(),
            timeout_secs: defaults::WIKIDATA_TIMEOUT_SECS,
            max_attempts: defaults::WIKIDATA_MAX_ATTEMPTS,
            backoff_base_ms: defaults::WIKIDATA_BACKOFF_BASE_MS,
            backoff_jitter_ms: defaults::WIKIDATA_BACKOFF_JITTER_MS,
            backoff_max_ms: defaults::WIKIDATA_BACKOFF_MAX_MS,
            identity_limit: defaults::IDENTITY_LOOKUP_LIMIT,
        }
    }
}

impl WikidataConfig {
    /// Load from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `WIKIDATA_ENDPOINT` | `https://query.wikidata.org/sparql` |
    /// | `WIKIDATA_USER_AGENT` | `chronicle-enrich/<version> (...)` |
    /// | `WIKIDATA_TIMEOUT_SECS` | 30 |
    /// | `WIKIDATA_MAX_ATTEMPTS` | 5 |
    /// | `WIKIDATA_BACKOFF_BASE_MS` | 500 |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpoint: std::env::var("WIKIDATA_ENDPOINT").unwrap_or(d.endpoint),
            user_agent: std::env::var("WIKIDATA_USER_AGENT").unwrap_or(d.user_agent),
            timeout_secs: std::env::var("WIKIDATA_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.timeout_secs),
            max_attempts: std::env::var("WIKIDATA_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.max_attempts)
                .max(1),
            backoff_base_ms: std::env::var("WIKIDATA_BACKOFF_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.backoff_base_ms),
            ..d
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set base, jitter and cap of the backoff in one call.
    pub fn with_backoff(mut self, base_ms: u64, jitter_ms: u64, max_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_jitter_ms = jitter_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Worst-case time one query spends backing off across all attempts,
    /// not counting the requests themselves. A `Retry-After` hint can raise
    /// any single wait up to `backoff_max_ms`, so every wait counts at the
    /// cap.
    pub fn retry_budget(&self) -> Duration {
        let waits = u64::from(self.max_attempts.saturating_sub(1));
        Duration::from_millis(self.backoff_max_ms.saturating_mul(waits))
    }
}
