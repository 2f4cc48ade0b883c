//! Seams between the pipeline and its collaborators.
//!
//! Each trait is implemented once against production infrastructure and once
//! in memory for tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::geography::{ContinentDuplicate, ContinentMapping};
use crate::models::{
    AttributeBundle, EnrichmentCandidate, EntityKind, ExternalKey, Lookup, RunFilter,
};
use crate::progress::Checkpoint;

/// Paginated, filtered enumeration of candidates.
///
/// Pages are ordered by `stable_id`, so `(filter, offset, size)` names the
/// same page as long as the matching set is stable.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Number of candidates matching the filter.
    async fn count(&self, filter: &RunFilter) -> Result<u64>;

    /// Up to `size` candidates starting at `offset`. An empty page means the
    /// set is exhausted; `Err` means the read failed and may be retried.
    async fn next_batch(
        &self,
        filter: &RunFilter,
        offset: u64,
        size: usize,
    ) -> Result<Vec<EnrichmentCandidate>>;
}

/// Local graph access used by the enricher.
#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    /// Whether the entity is still present.
    async fn exists(&self, kind: EntityKind, stable_id: &str) -> Result<bool>;

    /// Case-insensitive display-name lookup, for single-entity operations.
    async fn find_by_name(&self, kind: EntityKind, name: &str)
        -> Result<Option<EnrichmentCandidate>>;

    /// Idempotently merge the external key, attributes and derived
    /// relationships into the entity. Re-running with the same bundle leaves
    /// the graph unchanged.
    async fn upsert_enrichment(
        &self,
        kind: EntityKind,
        stable_id: &str,
        key: &ExternalKey,
        bundle: &AttributeBundle,
    ) -> Result<()>;
}

/// External knowledge base.
///
/// `Lookup::Unavailable` reports exhausted retries. `Err` is reserved for
/// permanent failures such as a rejected query.
#[async_trait]
pub trait ExternalResolver: Send + Sync {
    /// Candidate keys whose label matches `name` exactly, best first.
    async fn resolve_identity(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Lookup<Vec<ExternalKey>>>;

    /// Attribute bundle for a resolved key.
    async fn fetch_attributes(
        &self,
        kind: EntityKind,
        key: &ExternalKey,
    ) -> Result<Lookup<AttributeBundle>>;
}

/// Durable storage for the run checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically replace the stored checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Stored checkpoint. A missing or unreadable checkpoint is `Ok(None)`.
    async fn load(&self) -> Result<Option<Checkpoint>>;

    /// Remove the stored checkpoint, if any.
    async fn clear(&self) -> Result<()>;
}

/// Country and continent nodes of the graph.
#[async_trait]
pub trait GeographyStore: Send + Sync {
    /// Names of every country node, in order.
    async fn countries(&self) -> Result<Vec<String>>;

    /// Countries linked to more than one continent, most links first.
    async fn duplicate_continents(&self) -> Result<Vec<ContinentDuplicate>>;

    /// Replace every continent link of `country` with one link to
    /// `continent`, merging the continent node. Repeating the call leaves the
    /// graph unchanged. A missing country is `LocalNotFound`.
    async fn place_country(&self, country: &str, continent: &str) -> Result<()>;
}

/// Knowledge-base listing of country placements.
#[async_trait]
pub trait GeographyResolver: Send + Sync {
    async fn country_continents(&self) -> Result<Lookup<ContinentMapping>>;
}
