//! Unresolved reading-list reference

use serde::{Deserialize, Serialize};

/// One unresolved mention of an issue in a reading order
///
/// Immutable once parsed. `position` is the ordinal in the source sequence
/// and is what output ordering is restored from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Series name as written by the source (raw text)
    pub series_name: String,
    /// Issue number as written ("43", "1/2", "Annual 1")
    pub issue_number: String,
    /// Publication year, when the source gives one
    #[serde(default)]
    pub year: Option<i32>,
    /// Ordinal position in the source sequence
    #[serde(default)]
    pub position: usize,
}

impl Reference {
    pub fn new(
        series_name: impl Into<String>,
        issue_number: impl Into<String>,
        year: Option<i32>,
        position: usize,
    ) -> Self {
        Self {
            series_name: series_name.into(),
            issue_number: issue_number.into(),
            year,
            position,
        }
    }

    /// Human-readable label for logs and progress messages
    pub fn label(&self) -> String {
        match self.year {
            Some(year) => format!("{} #{} ({})", self.series_name, self.issue_number, year),
            None => format!("{} #{}", self.series_name, self.issue_number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label() {
        let r = Reference::new("Green Lantern", "43", Some(2009), 0);
        assert_eq!(r.label(), "Green Lantern #43 (2009)");
        let r = Reference::new("Blackest Night", "1", None, 1);
        assert_eq!(r.label(), "Blackest Night #1");
    }

    #[test]
    fn test_deserialize_without_optional_fields() {
        let r: Reference =
            serde_json::from_str(r#"{"series_name": "Flash", "issue_number": "1"}"#).unwrap();
        assert_eq!(r.year, None);
        assert_eq!(r.position, 0);
    }
}
