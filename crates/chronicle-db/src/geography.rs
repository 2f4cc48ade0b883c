//! Country and continent placement over label nodes.

use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

use chronicle_core::{
    ContinentDuplicate, Error, GeographyStore, RelationType, Result, CONTINENT_LABEL,
    COUNTRY_LABEL,
};

use crate::graph::PgGraphStore;

impl PgGraphStore {
    /// Merge a country node and link it to `continent`. Used by importers
    /// and tests; existing links are kept.
    pub async fn link_country(&self, country: &str, continent: &str) -> Result<()> {
        let mut tx = self.pool().begin().await.map_err(Error::Database)?;
        for (label, key) in [(COUNTRY_LABEL, country), (CONTINENT_LABEL, continent)] {
            sqlx::query(
                "INSERT INTO graph_label_node (label, natural_key) VALUES ($1, $2)
                 ON CONFLICT (label, natural_key) DO NOTHING",
            )
            .bind(label)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }
        insert_link(&mut tx, country, continent).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    /// Continents a country is linked to, in name order.
    pub async fn continents_of(&self, country: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT to_key FROM graph_label_relation
             WHERE from_label = $1 AND from_key = $2 AND rel_type = $3 AND to_label = $4
             ORDER BY to_key",
        )
        .bind(COUNTRY_LABEL)
        .bind(country)
        .bind(RelationType::LocatedIn.as_str())
        .bind(CONTINENT_LABEL)
        .fetch_all(self.pool())
        .await
        .map_err(Error::Database)
    }
}

async fn insert_link(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    country: &str,
    continent: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO graph_label_relation (from_label, from_key, rel_type, to_label, to_key)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT DO NOTHING",
    )
    .bind(COUNTRY_LABEL)
    .bind(country)
    .bind(RelationType::LocatedIn.as_str())
    .bind(CONTINENT_LABEL)
    .bind(continent)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

#[async_trait]
impl GeographyStore for PgGraphStore {
    async fn countries(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT natural_key FROM graph_label_node WHERE label = $1 ORDER BY natural_key",
        )
        .bind(COUNTRY_LABEL)
        .fetch_all(self.pool())
        .await
        .map_err(Error::Database)
    }

    async fn duplicate_continents(&self) -> Result<Vec<ContinentDuplicate>> {
        let rows = sqlx::query(
            "SELECT from_key, array_agg(to_key ORDER BY to_key) AS continents
             FROM graph_label_relation
             WHERE from_label = $1 AND rel_type = $2 AND to_label = $3
             GROUP BY from_key
             HAVING COUNT(*) > 1
             ORDER BY COUNT(*) DESC, from_key",
        )
        .bind(COUNTRY_LABEL)
        .bind(RelationType::LocatedIn.as_str())
        .bind(CONTINENT_LABEL)
        .fetch_all(self.pool())
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| ContinentDuplicate {
                country: row.get("from_key"),
                continents: row.get("continents"),
            })
            .collect())
    }

    async fn place_country(&self, country: &str, continent: &str) -> Result<()> {
        let mut tx = self.pool().begin().await.map_err(Error::Database)?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM graph_label_node WHERE label = $1 AND natural_key = $2)",
        )
        .bind(COUNTRY_LABEL)
        .bind(country)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if !exists {
            return Err(Error::LocalNotFound(format!("country {}", country)));
        }

        let removed = sqlx::query(
            "DELETE FROM graph_label_relation
             WHERE from_label = $1 AND from_key = $2 AND rel_type = $3
               AND to_label = $4 AND to_key <> $5",
        )
        .bind(COUNTRY_LABEL)
        .bind(country)
        .bind(RelationType::LocatedIn.as_str())
        .bind(CONTINENT_LABEL)
        .bind(continent)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        sqlx::query(
            "INSERT INTO graph_label_node (label, natural_key) VALUES ($1, $2)
             ON CONFLICT (label, natural_key) DO NOTHING",
        )
        .bind(CONTINENT_LABEL)
        .bind(continent)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        insert_link(&mut tx, country, continent).await?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "geography",
            op = "place_country",
            country,
            continent,
            removed_links = removed,
            "Country placed"
        );
        Ok(())
    }
}
