//! Country placement on continents.
//!
//! Country and continent nodes are label nodes (`Country`, `Continent`)
//! joined by `LOCATED_IN`. Imports sometimes link a country to several
//! continents; the repair job replaces those links with the single
//! placement the knowledge base lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{is_unresolved_label, truncate_detail};

/// Label of country nodes.
pub const COUNTRY_LABEL: &str = "Country";

/// Label of continent nodes.
pub const CONTINENT_LABEL: &str = "Continent";

/// Country name to continent name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinentMapping {
    entries: BTreeMap<String, String>,
}

impl ContinentMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a placement. Unresolved labels are ignored, and a country
    /// listed on several continents keeps the first one recorded.
    pub fn insert(&mut self, country: &str, continent: &str) -> bool {
        let (country, continent) = (country.trim(), continent.trim());
        if country.is_empty()
            || continent.is_empty()
            || is_unresolved_label(country)
            || is_unresolved_label(continent)
            || self.entries.contains_key(country)
        {
            return false;
        }
        self.entries
            .insert(country.to_string(), continent.to_string());
        true
    }

    pub fn continent_of(&self, country: &str) -> Option<&str> {
        self.entries.get(country.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ContinentMapping {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (country, continent) in iter {
            mapping.insert(country, continent);
        }
        mapping
    }
}

/// Country linked to more than one continent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinentDuplicate {
    pub country: String,
    pub continents: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Updated,
    NotFoundExternally,
    Error,
}

/// Outcome of placing one country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRepair {
    pub country: String,
    pub continent: Option<String>,
    pub status: RepairStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CountryRepair {
    pub fn updated(country: &str, continent: &str) -> Self {
        Self {
            country: country.to_string(),
            continent: Some(continent.to_string()),
            status: RepairStatus::Updated,
            error: None,
        }
    }

    pub fn not_found(country: &str) -> Self {
        Self {
            country: country.to_string(),
            continent: None,
            status: RepairStatus::NotFoundExternally,
            error: None,
        }
    }

    pub fn failed(country: &str, continent: &str, message: &str) -> Self {
        Self {
            country: country.to_string(),
            continent: Some(continent.to_string()),
            status: RepairStatus::Error,
            error: Some(truncate_detail(message)),
        }
    }
}

/// Tally of a continent repair pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinentRepairReport {
    pub processed: u64,
    pub updated: u64,
    pub errors: u64,
    pub not_found: u64,
    pub results: Vec<CountryRepair>,
}

impl ContinentRepairReport {
    pub fn record(&mut self, repair: CountryRepair) {
        self.processed += 1;
        match repair.status {
            RepairStatus::Updated => self.updated += 1,
            RepairStatus::NotFoundExternally => self.not_found += 1,
            RepairStatus::Error => self.errors += 1,
        }
        self.results.push(repair);
    }
}
