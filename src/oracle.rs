use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::model::BookId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("availability source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed availability data: {0}")]
    Malformed(String),
}

/// One book's availability as published by the loans system.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookAvailability {
    pub book_id: BookId,
    #[serde(default)]
    pub available_copies: u32,
    #[serde(default)]
    pub predicted_return_dates: Vec<NaiveDate>,
}

/// Full availability picture, e.g.
/// `{"books": [{"book_id": 1, "available_copies": 1, "predicted_return_dates": ["2024-07-01"]}]}`.
/// Books left out have no copies and no predictions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AvailabilitySnapshot {
    #[serde(default)]
    pub books: Vec<BookAvailability>,
}

impl AvailabilitySnapshot {
    pub fn from_json(raw: &str) -> Result<Self, OracleError> {
        serde_json::from_str(raw).map_err(|e| OracleError::Malformed(e.to_string()))
    }

    pub async fn read(path: &Path) -> Result<Self, OracleError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OracleError::Unavailable(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }
}

/// Books whose data differs after loading a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChanges {
    pub copies: BTreeSet<BookId>,
    pub return_dates: BTreeSet<BookId>,
}

/// Copy counts and loan-return predictions for a book, owned by other systems.
#[async_trait]
pub trait AvailabilityOracle: Send + Sync {
    /// Expected return dates of outstanding loans, earliest first.
    async fn predicted_return_dates(&self, book_id: BookId) -> Result<Vec<NaiveDate>, OracleError>;

    /// Copies on the shelf now or about to be.
    async fn available_copy_count(&self, book_id: BookId) -> Result<u32, OracleError>;
}

/// An oracle fed by hand. Books nobody told it about have no predictions and
/// no copies.
#[derive(Debug, Default)]
pub struct StaticOracle {
    return_dates: DashMap<BookId, Vec<NaiveDate>>,
    copies: DashMap<BookId, u32>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored sorted, as callers of the oracle expect.
    pub fn set_predicted_return_dates(&self, book_id: BookId, mut dates: Vec<NaiveDate>) {
        dates.sort();
        self.return_dates.insert(book_id, dates);
    }

    pub fn set_available_copies(&self, book_id: BookId, copies: u32) {
        self.copies.insert(book_id, copies);
    }

    /// Replace everything with `snapshot` and report which books changed.
    pub fn load(&self, snapshot: AvailabilitySnapshot) -> SnapshotChanges {
        let mut changes = SnapshotChanges::default();
        let mut seen = BTreeSet::new();

        for book in snapshot.books {
            let id = book.book_id;
            seen.insert(id);
            let mut dates = book.predicted_return_dates;
            dates.sort();

            let old_copies = self.copies.insert(id, book.available_copies).unwrap_or(0);
            if old_copies != book.available_copies {
                changes.copies.insert(id);
            }
            let old_dates = self.return_dates.insert(id, dates.clone()).unwrap_or_default();
            if old_dates != dates {
                changes.return_dates.insert(id);
            }
        }

        self.copies.retain(|id, copies| {
            let keep = seen.contains(id);
            if !keep && *copies != 0 {
                changes.copies.insert(*id);
            }
            keep
        });
        self.return_dates.retain(|id, dates| {
            let keep = seen.contains(id);
            if !keep && !dates.is_empty() {
                changes.return_dates.insert(*id);
            }
            keep
        });
        changes
    }
}

#[async_trait]
impl AvailabilityOracle for StaticOracle {
    async fn predicted_return_dates(&self, book_id: BookId) -> Result<Vec<NaiveDate>, OracleError> {
        Ok(self
            .return_dates
            .get(&book_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn available_copy_count(&self, book_id: BookId) -> Result<u32, OracleError> {
        Ok(self.copies.get(&book_id).map(|e| *e.value()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, day).unwrap()
    }

    #[tokio::test]
    async fn unknown_book_has_nothing() {
        let oracle = StaticOracle::new();
        assert!(oracle.predicted_return_dates(1).await.unwrap().is_empty());
        assert_eq!(oracle.available_copy_count(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dates_come_back_sorted() {
        let oracle = StaticOracle::new();
        oracle.set_predicted_return_dates(2, vec![d(20), d(3), d(11)]);
        oracle.set_available_copies(2, 3);
        assert_eq!(oracle.predicted_return_dates(2).await.unwrap(), vec![d(3), d(11), d(20)]);
        assert_eq!(oracle.available_copy_count(2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn snapshot_load_reports_changes() {
        let oracle = StaticOracle::new();
        oracle.set_available_copies(9, 2);
        oracle.set_predicted_return_dates(9, vec![d(1)]);
        oracle.set_available_copies(4, 1);

        let snapshot = AvailabilitySnapshot::from_json(
            r#"{"books": [
                {"book_id": 9, "available_copies": 2, "predicted_return_dates": ["2024-09-05", "2024-09-01"]},
                {"book_id": 7, "available_copies": 1}
            ]}"#,
        )
        .unwrap();
        let changes = oracle.load(snapshot);

        assert_eq!(changes.copies, BTreeSet::from([4, 7]));
        assert_eq!(changes.return_dates, BTreeSet::from([9]));
        assert_eq!(oracle.predicted_return_dates(9).await.unwrap(), vec![d(1), d(5)]);
        assert_eq!(oracle.available_copy_count(4).await.unwrap(), 0);
        assert_eq!(oracle.available_copy_count(7).await.unwrap(), 1);

        // Same data again: nothing to do.
        let again = AvailabilitySnapshot {
            books: vec![
                BookAvailability {
                    book_id: 9,
                    available_copies: 2,
                    predicted_return_dates: vec![d(5), d(1)],
                },
                BookAvailability {
                    book_id: 7,
                    available_copies: 1,
                    predicted_return_dates: Vec::new(),
                },
            ],
        };
        assert_eq!(oracle.load(again), SnapshotChanges::default());
    }

    #[test]
    fn malformed_snapshot_rejected() {
        assert!(matches!(
            AvailabilitySnapshot::from_json(r#"{"books": [{"available_copies": 1}]}"#),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(
            AvailabilitySnapshot::from_json(r#"{"books": [{"book_id": 1, "predicted_return_dates": ["soon"]}]}"#),
            Err(OracleError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let path = std::env::temp_dir().join("waitlist_no_such_availability.json");
        assert!(matches!(
            AvailabilitySnapshot::read(&path).await,
            Err(OracleError::Unavailable(_))
        ));
    }
}
