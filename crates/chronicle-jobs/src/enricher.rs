//! Per-candidate enrichment.
//!
//! Every step can fail independently and each failure becomes a typed
//! [`EnrichmentResult`]. `enrich` never returns an error, so one bad
//! candidate cannot take down its batch.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, trace, warn};

use chronicle_core::{
    AttributeBundle, EnrichmentCandidate, EnrichmentResult, EnrichmentStore, EntityKind, Error,
    ExternalKey, ExternalResolver, Lookup, Result,
};

/// What a single-entity enrichment would write, without writing it.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentPreview {
    pub candidate: EnrichmentCandidate,
    /// Every key the identity lookup returned, in service order.
    pub matches: Vec<ExternalKey>,
    /// The key an enrichment would use (always the first match).
    pub selected: Option<ExternalKey>,
    pub bundle: Option<AttributeBundle>,
}

/// Resolves, fetches and writes back one candidate at a time.
pub struct EntityEnricher {
    store: Arc<dyn EnrichmentStore>,
    resolver: Arc<dyn ExternalResolver>,
}

impl EntityEnricher {
    pub fn new(store: Arc<dyn EnrichmentStore>, resolver: Arc<dyn ExternalResolver>) -> Self {
        Self { store, resolver }
    }

    /// Enrich one candidate. Failures are reported in the result.
    pub async fn enrich(&self, candidate: &EnrichmentCandidate) -> EnrichmentResult {
        let start = Instant::now();
        let result = match self.try_enrich(candidate).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "enricher",
                    stable_id = %candidate.stable_id,
                    kind = %candidate.kind,
                    error = %e,
                    "Enrichment failed"
                );
                EnrichmentResult::error(&candidate.stable_id, e.to_string())
            }
        };
        trace!(
            stable_id = %candidate.stable_id,
            status = %result.status,
            duration_ms = start.elapsed().as_millis() as u64,
            "Candidate processed"
        );
        result
    }

    async fn try_enrich(&self, candidate: &EnrichmentCandidate) -> Result<EnrichmentResult> {
        let id = candidate.stable_id.as_str();
        let Some(name) = candidate.name() else {
            return Ok(EnrichmentResult::skipped_no_name(id));
        };

        if !self.store.exists(candidate.kind, id).await? {
            debug!(stable_id = %id, "Candidate no longer in store");
            return Ok(EnrichmentResult::not_found_locally(id));
        }

        let key = match self.resolve(candidate.kind, name).await? {
            Lookup::Found((key, _)) => key,
            Lookup::NotFound => return Ok(EnrichmentResult::not_found_externally(id)),
            Lookup::Unavailable(reason) => return Ok(EnrichmentResult::error(id, reason)),
        };

        let bundle = match self.resolver.fetch_attributes(candidate.kind, &key).await {
            Ok(Lookup::Found(bundle)) => bundle,
            // The key alone is still worth recording.
            Ok(Lookup::NotFound) => AttributeBundle::basic(None, None),
            Ok(Lookup::Unavailable(reason)) => {
                return Ok(EnrichmentResult::error(id, reason).with_key(key))
            }
            Err(e) => return Ok(EnrichmentResult::error(id, e.to_string()).with_key(key)),
        };

        match self
            .store
            .upsert_enrichment(candidate.kind, id, &key, &bundle)
            .await
        {
            Ok(()) => Ok(EnrichmentResult::ok(id, key)),
            // Deleted between the existence check and the write.
            Err(Error::LocalNotFound(_)) => Ok(EnrichmentResult::not_found_locally(id)),
            Err(e) => Ok(EnrichmentResult::error(id, e.to_string()).with_key(key)),
        }
    }

    /// Resolve a name to the first matching key plus every match.
    async fn resolve(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Lookup<(ExternalKey, Vec<ExternalKey>)>> {
        let lookup = self.resolver.resolve_identity(kind, name).await?;
        Ok(match lookup {
            Lookup::Found(keys) => match keys.first().cloned() {
                Some(first) => {
                    if keys.len() > 1 {
                        debug!(
                            name,
                            matches = keys.len(),
                            selected = %first,
                            "Ambiguous name, taking first match"
                        );
                    }
                    Lookup::Found((first, keys))
                }
                None => Lookup::NotFound,
            },
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Unavailable(reason) => Lookup::Unavailable(reason),
        })
    }

    /// Look up an entity by name and report what enriching it would write.
    pub async fn preview_by_name(&self, kind: EntityKind, name: &str) -> Result<EnrichmentPreview> {
        let candidate = self.find(kind, name).await?;
        let name = candidate.name().unwrap_or(name).to_string();

        let (selected, matches) = match self.resolve(kind, &name).await? {
            Lookup::Found((first, keys)) => (Some(first), keys),
            Lookup::NotFound => (None, Vec::new()),
            Lookup::Unavailable(reason) => return Err(Error::TransientExternal(reason)),
        };

        let bundle = match &selected {
            Some(key) => match self.resolver.fetch_attributes(kind, key).await? {
                Lookup::Found(bundle) => Some(bundle),
                Lookup::NotFound => None,
                Lookup::Unavailable(reason) => return Err(Error::TransientExternal(reason)),
            },
            None => None,
        };

        Ok(EnrichmentPreview {
            candidate,
            matches,
            selected,
            bundle,
        })
    }

    /// Look up an entity by name and enrich it.
    pub async fn enrich_by_name(&self, kind: EntityKind, name: &str) -> Result<EnrichmentResult> {
        let candidate = self.find(kind, name).await?;
        Ok(self.enrich(&candidate).await)
    }

    async fn find(&self, kind: EntityKind, name: &str) -> Result<EnrichmentCandidate> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".into()));
        }
        self.store
            .find_by_name(kind, name)
            .await?
            .ok_or_else(|| Error::LocalNotFound(format!("no {} named {:?}", kind, name.trim())))
    }
}
