//! Centralized default constants for the chronicle pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// RUN CONTROLLER
// =============================================================================

/// Candidates pulled from the store per batch.
pub const BATCH_SIZE: usize = 50;

/// Pause between batches in milliseconds.
pub const BATCH_DELAY_MS: u64 = 1000;

/// Same-offset retries when a batch read fails.
pub const STORE_READ_RETRIES: u32 = 3;

/// Fixed wait between same-offset batch read retries in milliseconds.
pub const STORE_READ_RETRY_WAIT_MS: u64 = 5000;

/// Most recent per-entity errors kept in progress reports.
pub const RECENT_ERRORS_CAPACITY: usize = 10;

/// Maximum characters of an error message kept in a result.
pub const ERROR_DETAIL_MAX_CHARS: usize = 300;

/// Capacity of the run event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// WORKER POOL
// =============================================================================

/// Concurrent enrichment workers per batch.
pub const WORKERS: usize = 5;

/// Per-candidate timeout in seconds.
pub const TASK_TIMEOUT_SECS: u64 = 30;

/// Global submission rate in candidates per second (0 disables throttling).
pub const SUBMISSIONS_PER_SEC: u32 = 2;

// =============================================================================
// EXTERNAL KNOWLEDGE BASE
// =============================================================================

/// Default Wikidata SPARQL endpoint.
pub const WIKIDATA_ENDPOINT: &str = "https://query.wikidata.org/sparql";

/// Descriptive client identifier sent with every query.
pub const WIKIDATA_USER_AGENT: &str = concat!(
    "chronicle-enrich/",
    env!("CARGO_PKG_VERSION"),
    " (knowledge-graph enrichment)"
);

/// Per-request timeout in seconds.
pub const WIKIDATA_TIMEOUT_SECS: u64 = 30;

/// Total attempts per query before reporting the service unavailable.
pub const WIKIDATA_MAX_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff in milliseconds.
pub const WIKIDATA_BACKOFF_BASE_MS: u64 = 500;

/// Upper bound of the random jitter added to each backoff in milliseconds.
pub const WIKIDATA_BACKOFF_JITTER_MS: u64 = 500;

/// Longest single backoff wait in milliseconds, `Retry-After` included.
/// All retries of one query must fit inside `TASK_TIMEOUT_SECS`, otherwise
/// the worker timeout fires before the query reports itself unavailable.
pub const WIKIDATA_BACKOFF_MAX_MS: u64 = 5000;

/// Identity candidates requested per name lookup.
pub const IDENTITY_LOOKUP_LIMIT: usize = 5;
