use chrono::NaiveDate;

use crate::model::*;

use super::queue::sort_by_position;
use super::{Engine, EngineError};

impl Engine {
    pub async fn find_all(&self) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.store.find_all().await?)
    }

    /// A book's waitlist, front of the line first.
    pub async fn find_all_by_book_id(&self, book_id: BookId) -> Result<Vec<Reservation>, EngineError> {
        let mut waitlist = self.store.find_all_by_book_id(book_id).await?;
        sort_by_position(&mut waitlist);
        Ok(waitlist)
    }

    pub async fn find_all_by_customer_id(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, EngineError> {
        Ok(self.store.find_all_by_customer_id(customer_id).await?)
    }

    pub async fn find_by_id(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(ReservationRef::Id(id)))
    }

    pub async fn find_by_customer_id_and_book_id(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<Reservation, EngineError> {
        self.store
            .find_by_customer_id_and_book_id(customer_id, book_id)
            .await?
            .ok_or(EngineError::NotFound(ReservationRef::CustomerBook {
                customer_id,
                book_id,
            }))
    }

    pub async fn exists_by_customer_id_and_book_id(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<bool, EngineError> {
        Ok(self
            .store
            .exists_by_customer_id_and_book_id(customer_id, book_id)
            .await?)
    }

    /// Reservations whose priority deadline is before `today`.
    pub async fn collect_expired(&self, today: NaiveDate) -> Result<Vec<Reservation>, EngineError> {
        let mut expired: Vec<Reservation> = self
            .store
            .find_all()
            .await?
            .into_iter()
            .filter(|r| r.is_priority_expired(today))
            .collect();
        expired.sort_by_key(|r| (r.book_id, r.position));
        Ok(expired)
    }
}
