use thiserror::Error;

use crate::model::{BookId, CustomerId, ReservationRef};
use crate::oracle::OracleError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(ReservationRef),
    #[error("customer {customer_id} already has a reservation for book {book_id}")]
    AlreadyReserved {
        customer_id: CustomerId,
        book_id: BookId,
    },
    #[error("predicted return dates cover {supplied} reservations, {required} needed")]
    InvalidDateSequence { required: usize, supplied: usize },
    #[error("timed out waiting for the waitlist of book {0}")]
    LockTimeout(BookId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

impl EngineError {
    /// Worth retrying unchanged: only lock contention is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn display_messages() {
        assert_eq!(
            EngineError::AlreadyReserved {
                customer_id: 2,
                book_id: 18
            }
            .to_string(),
            "customer 2 already has a reservation for book 18"
        );
        assert_eq!(
            EngineError::InvalidDateSequence {
                required: 3,
                supplied: 1
            }
            .to_string(),
            "predicted return dates cover 1 reservations, 3 needed"
        );
        assert_eq!(
            EngineError::LockTimeout(7).to_string(),
            "timed out waiting for the waitlist of book 7"
        );
        let id = Ulid::new();
        assert_eq!(
            EngineError::NotFound(ReservationRef::Id(id)).to_string(),
            format!("not found: reservation {id}")
        );
        assert_eq!(
            EngineError::Store(StoreError::Wal("disk full".into())).to_string(),
            "WAL error: disk full"
        );
    }

    #[test]
    fn only_lock_timeout_is_retryable() {
        assert!(EngineError::LockTimeout(1).is_retryable());
        assert!(!EngineError::LimitExceeded("x").is_retryable());
        assert!(
            !EngineError::AlreadyReserved {
                customer_id: 1,
                book_id: 1
            }
            .is_retryable()
        );
        assert!(!EngineError::Store(StoreError::Wal("x".into())).is_retryable());
    }
}
