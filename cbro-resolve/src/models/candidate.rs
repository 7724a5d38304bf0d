//! Catalog entries produced by the catalog client

use serde::{Deserialize, Serialize};

/// One catalog series entry considered as a possible match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Catalog identifier
    pub id: u64,
    /// Display name
    pub name: String,
    /// Series start year
    pub start_year: Option<i32>,
    /// Total issues published in the series
    pub issue_count: Option<u32>,
    pub publisher: Option<String>,
    /// Alternate names known to the catalog
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// One issue inside a catalog series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogIssue {
    pub id: u64,
    pub volume_id: u64,
    /// Issue number as the catalog writes it
    pub issue_number: String,
    /// Cover date ("YYYY-MM-DD", sometimes only "YYYY-MM")
    pub cover_date: Option<String>,
    /// Story title, when the catalog has one
    pub name: Option<String>,
}

impl CatalogIssue {
    /// Year part of the cover date
    pub fn cover_year(&self) -> Option<i32> {
        self.cover_date
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok())
    }
}
