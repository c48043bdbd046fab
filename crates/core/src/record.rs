//! Employee-like records kept by a record store.

use serde::{Deserialize, Serialize};

use crate::{RecordId, Time};

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record ID
    pub id: RecordId,
    /// Display name
    pub name: String,
    /// Department the record belongs to
    pub department: String,
    /// Yearly salary
    pub salary: u32,
    /// Creation time
    pub created_at: Time,
}

/// Fields supplied when creating a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Display name
    pub name: String,
    /// Department
    pub department: String,
    /// Yearly salary
    pub salary: u32,
}

impl NewRecord {
    /// Create a new record description.
    pub fn new(name: impl Into<String>, department: impl Into<String>, salary: u32) -> Self {
        Self {
            name: name.into(),
            department: department.into(),
            salary,
        }
    }

    /// Materialize into a stored record with a fresh ID.
    pub fn into_record(self) -> Record {
        Record {
            id: RecordId::new(),
            name: self.name,
            department: self.department,
            salary: self.salary,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Predicate used to query records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Exact department match
    pub department: Option<String>,
    /// Case-insensitive substring of the name
    pub name_contains: Option<String>,
    /// Minimum salary (inclusive)
    pub min_salary: Option<u32>,
}

impl RecordFilter {
    /// Filter on a department.
    pub fn department(department: impl Into<String>) -> Self {
        Self {
            department: Some(department.into()),
            ..Default::default()
        }
    }

    /// Also require a minimum salary.
    pub fn with_min_salary(mut self, min: u32) -> Self {
        self.min_salary = Some(min);
        self
    }

    /// Also require the name to contain `needle`.
    pub fn with_name_contains(mut self, needle: impl Into<String>) -> Self {
        self.name_contains = Some(needle.into());
        self
    }

    /// Whether `record` satisfies this filter.
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(department) = &self.department {
            if &record.department != department {
                return false;
            }
        }

        if let Some(needle) = &self.name_contains {
            if !record.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }

        if let Some(min) = self.min_salary {
            if record.salary < min {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, department: &str, salary: u32) -> Record {
        NewRecord::new(name, department, salary).into_record()
    }

    #[test]
    fn test_default_filter_matches_everything() {
        let filter = RecordFilter::default();
        assert!(filter.matches(&record("Ada", "eng", 10)));
        assert!(filter.matches(&record("Grace", "ops", 0)));
    }

    #[test]
    fn test_filter_combines_fields() {
        let filter = RecordFilter::department("eng")
            .with_min_salary(100)
            .with_name_contains("ADA");

        assert!(filter.matches(&record("Ada Lovelace", "eng", 150)));
        assert!(!filter.matches(&record("Ada Lovelace", "ops", 150)));
        assert!(!filter.matches(&record("Ada Lovelace", "eng", 99)));
        assert!(!filter.matches(&record("Grace", "eng", 150)));
    }
}
