//! PostgreSQL-backed property graph store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use chronicle_core::{
    AttributeBundle, CandidateSource, EnrichmentCandidate, EnrichmentStore, EntityKind, Error,
    ExternalKey, Result, RunFilter,
};

use crate::filter::{CandidateFilterBuilder, QueryParam};

/// PostgreSQL implementation of [`CandidateSource`] and [`EnrichmentStore`].
#[derive(Clone)]
pub struct PgGraphStore {
    pool: Pool<Postgres>,
}

impl PgGraphStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert or rename an entity. Used by importers and tests to seed the
    /// graph; enrichment never creates entities.
    pub async fn upsert_entity(
        &self,
        kind: EntityKind,
        stable_id: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO graph_entity (kind, stable_id, display_name) VALUES ($1, $2, $3)
             ON CONFLICT (kind, stable_id) DO UPDATE SET display_name = EXCLUDED.display_name",
        )
        .bind(kind.as_str())
        .bind(stable_id)
        .bind(display_name)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Number of outgoing relations of an entity.
    pub async fn relation_count(&self, kind: EntityKind, stable_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM graph_relation WHERE from_kind = $1 AND from_id = $2",
        )
        .bind(kind.as_str())
        .bind(stable_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }

    /// When the entity was last enriched.
    pub async fn last_enriched_at(
        &self,
        kind: EntityKind,
        stable_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let at: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT last_enriched_at FROM graph_entity WHERE kind = $1 AND stable_id = $2",
        )
        .bind(kind.as_str())
        .bind(stable_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(at.flatten())
    }

    pub(crate) fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Stored external key of an entity.
    pub async fn external_key(&self, kind: EntityKind, stable_id: &str) -> Result<Option<String>> {
        let key: Option<Option<String>> = sqlx::query_scalar(
            "SELECT external_key FROM graph_entity WHERE kind = $1 AND stable_id = $2",
        )
        .bind(kind.as_str())
        .bind(stable_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(key.flatten())
    }
}

fn bind_params<'q>(
    mut q: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    params: &'q [QueryParam],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        q = match param {
            QueryParam::String(s) => q.bind(s),
            QueryParam::Timestamp(ts) => q.bind(ts),
        };
    }
    q
}

#[async_trait]
impl CandidateSource for PgGraphStore {
    async fn count(&self, filter: &RunFilter) -> Result<u64> {
        let (clause, params) = CandidateFilterBuilder::new(filter, 0).build();
        let sql = format!("SELECT COUNT(*) FROM graph_entity e WHERE {}", clause);

        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn next_batch(
        &self,
        filter: &RunFilter,
        offset: u64,
        size: usize,
    ) -> Result<Vec<EnrichmentCandidate>> {
        let (clause, params) = CandidateFilterBuilder::new(filter, 0).build();
        let sql = format!(
            "SELECT e.stable_id, e.display_name FROM graph_entity e
             WHERE {}
             ORDER BY e.stable_id
             OFFSET ${} LIMIT ${}",
            clause,
            params.len() + 1,
            params.len() + 2
        );

        let rows = bind_params(sqlx::query(&sql), &params)
            .bind(offset as i64)
            .bind(size as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| EnrichmentCandidate {
                kind: filter.kind,
                stable_id: row.get("stable_id"),
                display_name: row.get("display_name"),
            })
            .collect())
    }
}

#[async_trait]
impl EnrichmentStore for PgGraphStore {
    async fn exists(&self, kind: EntityKind, stable_id: &str) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM graph_entity WHERE kind = $1 AND stable_id = $2)",
        )
        .bind(kind.as_str())
        .bind(stable_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)
    }

    async fn find_by_name(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<EnrichmentCandidate>> {
        let row = sqlx::query(
            "SELECT stable_id, display_name FROM graph_entity
             WHERE kind = $1 AND lower(btrim(display_name)) = lower($2)
             ORDER BY stable_id LIMIT 1",
        )
        .bind(kind.as_str())
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| EnrichmentCandidate {
            kind,
            stable_id: row.get("stable_id"),
            display_name: row.get("display_name"),
        }))
    }

    async fn upsert_enrichment(
        &self,
        kind: EntityKind,
        stable_id: &str,
        key: &ExternalKey,
        bundle: &AttributeBundle,
    ) -> Result<()> {
        let attributes = JsonValue::Object(bundle.scalar_attributes());
        let edges = bundle.derived_edges();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let updated = sqlx::query(
            "UPDATE graph_entity SET
                external_key = $3,
                description = COALESCE($4, description),
                image_url = COALESCE($5, image_url),
                attributes = attributes || $6,
                last_enriched_at = $7
             WHERE kind = $1 AND stable_id = $2",
        )
        .bind(kind.as_str())
        .bind(stable_id)
        .bind(key.as_str())
        .bind(bundle.description.as_deref())
        .bind(bundle.image.as_deref())
        .bind(&attributes)
        // Same clock as the run's pin instant; the server clock may differ.
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::LocalNotFound(format!("{} {}", kind, stable_id)));
        }

        for edge in &edges {
            sqlx::query(
                "INSERT INTO graph_label_node (label, natural_key, properties) VALUES ($1, $2, $3)
                 ON CONFLICT (label, natural_key)
                 DO UPDATE SET properties = graph_label_node.properties || EXCLUDED.properties",
            )
            .bind(edge.target_label())
            .bind(&edge.target)
            .bind(JsonValue::Object(edge.node_properties.clone()))
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            sqlx::query(
                "INSERT INTO graph_relation (from_kind, from_id, rel_type, to_label, to_key, properties)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (from_kind, from_id, rel_type, to_label, to_key)
                 DO UPDATE SET properties = EXCLUDED.properties, updated_at = NOW()",
            )
            .bind(kind.as_str())
            .bind(stable_id)
            .bind(edge.relation.as_str())
            .bind(edge.target_label())
            .bind(&edge.target)
            .bind(JsonValue::Object(edge.edge_properties.clone()))
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "graph",
            op = "upsert_enrichment",
            %kind,
            stable_id,
            external_key = %key,
            edge_count = edges.len(),
            "Enrichment merged"
        );
        Ok(())
    }
}
