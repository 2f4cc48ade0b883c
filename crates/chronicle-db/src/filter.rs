//! SQL generation for candidate filters.
//!
//! A [`RunFilter`] becomes a parameterized WHERE fragment over the
//! `graph_entity e` alias. Column names come from closed enums, never from
//! caller strings.

use chrono::{DateTime, Utc};

use chronicle_core::{Criterion, EntityAttribute, RunFilter};

/// Type-safe parameter binding for generated fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    String(String),
    Timestamp(DateTime<Utc>),
}

/// Builds the WHERE fragment selecting candidates for a filter.
pub struct CandidateFilterBuilder<'a> {
    filter: &'a RunFilter,
    param_offset: usize,
}

impl<'a> CandidateFilterBuilder<'a> {
    /// `param_offset` is the number of parameters already in the query.
    pub fn new(filter: &'a RunFilter, param_offset: usize) -> Self {
        Self {
            filter,
            param_offset,
        }
    }

    /// Returns the SQL fragment and its parameters in placeholder order.
    pub fn build(&self) -> (String, Vec<QueryParam>) {
        let mut params = Vec::new();
        let mut param_idx = self.param_offset;

        param_idx += 1;
        params.push(QueryParam::String(self.filter.kind.as_str().to_string()));
        let kind_clause = format!("e.kind = ${}", param_idx);

        let criterion_clause = match self.filter.criterion {
            Criterion::All => "TRUE".to_string(),
            Criterion::Unenriched => "e.last_enriched_at IS NULL".to_string(),
            Criterion::MissingRelationship(relation) => {
                param_idx += 1;
                params.push(QueryParam::String(relation.as_str().to_string()));
                format!(
                    "NOT EXISTS (SELECT 1 FROM graph_relation r \
                     WHERE r.from_kind = e.kind AND r.from_id = e.stable_id AND r.rel_type = ${})",
                    param_idx
                )
            }
            Criterion::MissingAttribute(attr) => match attr {
                EntityAttribute::ExternalKey => "e.external_key IS NULL".to_string(),
                other => format!("NULLIF(e.{}, '') IS NULL", other.column()),
            },
        };

        // Entities written back during this run keep matching so offsets
        // computed against the original set stay valid.
        let selection = match self.filter.pinned_at {
            Some(pinned) => {
                param_idx += 1;
                params.push(QueryParam::Timestamp(pinned));
                format!(
                    "({} OR e.last_enriched_at >= ${})",
                    criterion_clause, param_idx
                )
            }
            None => criterion_clause,
        };

        (format!("{} AND {}", kind_clause, selection), params)
    }
}
