use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{CapacityRefresh, Engine, EngineError};
use crate::model::*;
use crate::oracle::AvailabilityOracle;

/// Result of one sweep over expired priority deadlines.
#[derive(Debug, Default)]
pub struct ExpirySweep {
    pub released: Vec<Reservation>,
    /// Capacity refreshes run for books that lost a reservation.
    pub refreshed: Vec<(BookId, CapacityRefresh)>,
    pub errors: Vec<EngineError>,
}

/// The engine wired to its availability source: each operation fetches the
/// book's current copy count or return predictions, then runs the queue
/// operation with them.
pub struct Waitlist {
    engine: Arc<Engine>,
    oracle: Arc<dyn AvailabilityOracle>,
}

impl Waitlist {
    pub fn new(engine: Arc<Engine>, oracle: Arc<dyn AvailabilityOracle>) -> Self {
        Self { engine, oracle }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn reserve(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let dates = self.oracle.predicted_return_dates(request.book_id).await?;
        let copies = self.oracle.available_copy_count(request.book_id).await?;
        self.engine.create(request, &dates, copies).await
    }

    /// The customer borrowed the book or gave up their place.
    pub async fn cancel(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<Reservation, EngineError> {
        let dates = self.oracle.predicted_return_dates(book_id).await?;
        self.engine
            .delete_by_customer_and_book(customer_id, book_id, &dates)
            .await
    }

    pub async fn release(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let book_id = self.engine.find_by_id(id).await?.book_id;
        let dates = self.oracle.predicted_return_dates(book_id).await?;
        self.engine.delete(id, &dates).await
    }

    pub async fn copies_changed(&self, book_id: BookId) -> Result<CapacityRefresh, EngineError> {
        let copies = self.oracle.available_copy_count(book_id).await?;
        self.engine.refresh_capacity(book_id, copies).await
    }

    pub async fn return_dates_changed(&self, book_id: BookId) -> Result<Vec<Reservation>, EngineError> {
        let dates = self.oracle.predicted_return_dates(book_id).await?;
        self.engine.refresh_dates(book_id, &dates).await
    }

    /// Drop every reservation whose deadline has passed, then hand the freed
    /// copies to whoever is next in line. Errors on one reservation or book
    /// don't stop the sweep.
    pub async fn release_expired(&self) -> Result<ExpirySweep, EngineError> {
        let today = self.engine.today();
        let expired = self.engine.collect_expired(today).await?;
        let mut sweep = ExpirySweep::default();
        let mut books = BTreeSet::new();

        for r in expired {
            let released = match self.oracle.predicted_return_dates(r.book_id).await {
                Ok(dates) => self.engine.release_if_expired(r.id, &dates).await,
                Err(e) => Err(e.into()),
            };
            match released {
                Ok(Some(gone)) => {
                    info!(
                        "released reservation {} of customer {} on book {}: deadline passed",
                        gone.id, gone.customer_id, gone.book_id
                    );
                    books.insert(gone.book_id);
                    sweep.released.push(gone);
                }
                Ok(None) => debug!("reservation {} no longer expired, skipped", r.id),
                Err(e) => {
                    warn!("could not release reservation {}: {e}", r.id);
                    sweep.errors.push(e);
                }
            }
        }

        for book_id in books {
            match self.copies_changed(book_id).await {
                Ok(refresh) => sweep.refreshed.push((book_id, refresh)),
                Err(e) => {
                    warn!("capacity refresh after expiry failed for book {book_id}: {e}");
                    sweep.errors.push(e);
                }
            }
        }
        Ok(sweep)
    }

    pub async fn find_all(&self) -> Result<Vec<Reservation>, EngineError> {
        self.engine.find_all().await
    }

    pub async fn find_all_by_book_id(&self, book_id: BookId) -> Result<Vec<Reservation>, EngineError> {
        self.engine.find_all_by_book_id(book_id).await
    }

    pub async fn find_all_by_customer_id(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.engine.find_all_by_customer_id(customer_id).await
    }

    pub async fn find_by_id(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.engine.find_by_id(id).await
    }

    pub async fn find_by_customer_id_and_book_id(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<Reservation, EngineError> {
        self.engine
            .find_by_customer_id_and_book_id(customer_id, book_id)
            .await
    }

    pub async fn exists(&self, customer_id: CustomerId, book_id: BookId) -> Result<bool, EngineError> {
        self.engine
            .exists_by_customer_id_and_book_id(customer_id, book_id)
            .await
    }
}
