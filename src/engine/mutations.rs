use chrono::NaiveDate;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::notify::PriorityNotice;

use super::deadline::end_of_priority;
use super::queue::{
    assign_soon_dates, close_gap, in_priority_window, is_contiguous, soon_date_for_rank,
    sort_by_position,
};
use super::{BookLockGuard, CapacityRefresh, Engine, EngineError};

fn validate_request(request: &ReservationRequest) -> Result<(), EngineError> {
    let fields = [
        &request.customer_first_name,
        &request.customer_last_name,
        &request.customer_email,
        &request.book_title,
    ];
    if fields.iter().any(|f| f.len() > MAX_FIELD_LEN) {
        return Err(EngineError::LimitExceeded("contact or title field too long"));
    }
    Ok(())
}

fn validate_dates(predicted_return_dates: &[NaiveDate]) -> Result<(), EngineError> {
    if predicted_return_dates.len() > MAX_DATE_SEQUENCE_LEN {
        return Err(EngineError::LimitExceeded("too many predicted return dates"));
    }
    Ok(())
}

impl Engine {
    /// Append a customer to the end of a book's waitlist.
    ///
    /// `predicted_return_dates` are the book's outstanding loans, earliest
    /// first; the new entrant's expected date is the one at its zero-based
    /// rank. A deadline is set right away when the new position already fits
    /// within `available_copies`.
    pub async fn create(
        &self,
        request: ReservationRequest,
        predicted_return_dates: &[NaiveDate],
        available_copies: u32,
    ) -> Result<Reservation, EngineError> {
        validate_request(&request)?;
        validate_dates(predicted_return_dates)?;
        let (customer_id, book_id) = (request.customer_id, request.book_id);
        let _lock = self.lock_book(book_id).await?;

        if self
            .store
            .exists_by_customer_id_and_book_id(customer_id, book_id)
            .await?
        {
            return Err(EngineError::AlreadyReserved {
                customer_id,
                book_id,
            });
        }

        let waitlist = self.store.find_all_by_book_id(book_id).await?;
        if waitlist.len() >= MAX_WAITLIST_LEN {
            return Err(EngineError::LimitExceeded("waitlist full"));
        }

        let now = self.clock.now();
        let today = now.date();
        let rank = waitlist.len();
        let position = rank as u32 + 1;
        let soon_disponibility_date = soon_date_for_rank(predicted_return_dates, rank, today)?;
        let deadline = in_priority_window(position, available_copies).then(|| end_of_priority(today));

        let reservation = self
            .store
            .insert(NewReservation {
                request,
                creation_reservation_date: now,
                position,
                soon_disponibility_date,
                end_of_priority: deadline,
            })
            .await?;

        info!(
            "reservation {} created: customer {customer_id}, book {book_id}, position {position}",
            reservation.id
        );
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(reservation)
    }

    /// Give the first `number_of_copies` customers in line a deadline and tell
    /// them. Everyone further back is left as is.
    pub async fn refresh_capacity(
        &self,
        book_id: BookId,
        number_of_copies: u32,
    ) -> Result<CapacityRefresh, EngineError> {
        let updated = {
            let _lock = self.lock_book(book_id).await?;
            let mut waitlist = self.store.find_all_by_book_id(book_id).await?;
            if waitlist.is_empty() {
                debug!("capacity refresh on book {book_id}: empty waitlist");
                return Ok(CapacityRefresh::default());
            }
            sort_by_position(&mut waitlist);

            let deadline = end_of_priority(self.clock.today());
            let window = waitlist.len().min(number_of_copies as usize);
            waitlist.truncate(window);
            for r in &mut waitlist {
                r.end_of_priority = Some(deadline);
            }
            self.store.save_all(waitlist).await?
        };

        debug!(
            "capacity refresh on book {book_id}: {} of {number_of_copies} copies assigned",
            updated.len()
        );

        // Lock released: delivery is outside the write.
        let notices = updated
            .iter()
            .filter_map(|r| r.end_of_priority.map(|d| PriorityNotice::for_reservation(r, d)))
            .collect();
        let (notified, failed) = self.send_notices(notices).await;
        Ok(CapacityRefresh {
            updated,
            notified,
            failed,
        })
    }

    /// Overwrite every expected availability date of a book, one predicted
    /// date per reservation in position order.
    pub async fn refresh_dates(
        &self,
        book_id: BookId,
        predicted_return_dates: &[NaiveDate],
    ) -> Result<Vec<Reservation>, EngineError> {
        validate_dates(predicted_return_dates)?;
        let _lock = self.lock_book(book_id).await?;
        let mut waitlist = self.store.find_all_by_book_id(book_id).await?;
        if waitlist.is_empty() {
            return Ok(waitlist);
        }
        sort_by_position(&mut waitlist);
        assign_soon_dates(&mut waitlist, predicted_return_dates)?;

        debug!("date refresh on book {book_id}: {} reservations", waitlist.len());
        Ok(self.store.save_all(waitlist).await?)
    }

    /// Remove a reservation and move everyone behind it one place forward.
    ///
    /// `predicted_return_dates` are indexed by post-removal position. Returns
    /// the removed record.
    pub async fn delete(
        &self,
        id: ReservationId,
        predicted_return_dates: &[NaiveDate],
    ) -> Result<Reservation, EngineError> {
        validate_dates(predicted_return_dates)?;
        let book_id = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(ReservationRef::Id(id)))?
            .book_id;
        let lock = self.lock_book(book_id).await?;
        // Re-read under the lock: it may have gone while we waited.
        let target = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(ReservationRef::Id(id)))?;
        self.remove_and_reindex(&lock, target, predicted_return_dates)
            .await
    }

    pub async fn delete_by_customer_and_book(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
        predicted_return_dates: &[NaiveDate],
    ) -> Result<Reservation, EngineError> {
        validate_dates(predicted_return_dates)?;
        let lock = self.lock_book(book_id).await?;
        let target = self
            .store
            .find_by_customer_id_and_book_id(customer_id, book_id)
            .await?
            .ok_or(EngineError::NotFound(ReservationRef::CustomerBook {
                customer_id,
                book_id,
            }))?;
        self.remove_and_reindex(&lock, target, predicted_return_dates)
            .await
    }

    /// Delete a reservation whose priority deadline has passed. `Ok(None)`
    /// when it is gone or was given a fresh deadline in the meantime.
    pub async fn release_if_expired(
        &self,
        id: ReservationId,
        predicted_return_dates: &[NaiveDate],
    ) -> Result<Option<Reservation>, EngineError> {
        validate_dates(predicted_return_dates)?;
        let Some(seen) = self.store.find_by_id(id).await? else {
            return Ok(None);
        };
        let lock = self.lock_book(seen.book_id).await?;
        let today = self.clock.today();
        match self.store.find_by_id(id).await? {
            Some(target) if target.is_priority_expired(today) => {
                let removed = self
                    .remove_and_reindex(&lock, target, predicted_return_dates)
                    .await?;
                metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL).increment(1);
                Ok(Some(removed))
            }
            _ => Ok(None),
        }
    }

    /// Removal, renumbering and date reassignment as one atomic batch.
    /// Validates everything before writing anything.
    async fn remove_and_reindex(
        &self,
        lock: &BookLockGuard<'_>,
        target: Reservation,
        predicted_return_dates: &[NaiveDate],
    ) -> Result<Reservation, EngineError> {
        let book_id = target.book_id;
        debug_assert_eq!(lock.book_id(), book_id);

        let mut remaining: Vec<Reservation> = self
            .store
            .find_all_by_book_id(book_id)
            .await?
            .into_iter()
            .filter(|r| r.id != target.id)
            .collect();

        if !remaining.is_empty() {
            close_gap(&mut remaining, target.position);
            sort_by_position(&mut remaining);
            if predicted_return_dates.is_empty() {
                let today = self.clock.today();
                for r in &mut remaining {
                    r.soon_disponibility_date = today;
                }
            } else {
                assign_soon_dates(&mut remaining, predicted_return_dates)?;
            }
            debug_assert!(is_contiguous(&remaining));
        }

        let batch = WriteBatch::new(book_id)
            .delete(target.id)
            .save_all(remaining);
        self.store.commit(batch).await?;

        info!(
            "reservation {} deleted: customer {}, book {book_id}, was position {}",
            target.id, target.customer_id, target.position
        );
        metrics::counter!(crate::observability::RESERVATIONS_DELETED_TOTAL).increment(1);
        Ok(target)
    }
}
