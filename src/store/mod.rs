mod memory;
mod wal;

pub use memory::MemoryStore;
pub use wal::WalStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("reservation {id} belongs to book {actual}, batch is for book {expected}")]
    BookMismatch {
        id: ReservationId,
        expected: BookId,
        actual: BookId,
    },
    #[error("unknown reservation: {0}")]
    UnknownReservation(ReservationId),
}

/// Durable home of reservation records.
///
/// Implementations must apply a [`WriteBatch`] atomically: readers see either
/// none or all of it, and a rejected batch leaves the store untouched.
/// Concurrent writers to the same book are not coordinated here; the engine
/// serializes them with its per-book lock.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Reservation>, StoreError>;

    async fn find_by_id(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// In no particular order.
    async fn find_all_by_book_id(&self, book_id: BookId) -> Result<Vec<Reservation>, StoreError>;

    async fn find_all_by_customer_id(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn find_by_customer_id_and_book_id(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<Option<Reservation>, StoreError>;

    async fn exists_by_customer_id_and_book_id(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .find_by_customer_id_and_book_id(customer_id, book_id)
            .await?
            .is_some())
    }

    /// Store a new record under a freshly assigned id.
    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn save(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let batch = WriteBatch::new(reservation.book_id).save_all([reservation.clone()]);
        self.commit(batch).await?;
        Ok(reservation)
    }

    /// Atomic upsert of reservations that must all share one book.
    async fn save_all(&self, reservations: Vec<Reservation>) -> Result<Vec<Reservation>, StoreError> {
        let Some(book_id) = reservations.first().map(|r| r.book_id) else {
            return Ok(reservations);
        };
        self.commit(WriteBatch::new(book_id).save_all(reservations.iter().cloned()))
            .await?;
        Ok(reservations)
    }

    async fn delete_by_id(&self, id: ReservationId) -> Result<(), StoreError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or(StoreError::UnknownReservation(id))?;
        self.commit(WriteBatch::new(existing.book_id).delete(id)).await
    }
}
