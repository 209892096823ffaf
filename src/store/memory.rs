use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{ReservationStore, StoreError};

/// Reservations grouped by book, one DashMap entry per waitlist, so a batch is
/// applied while holding a single shard lock.
pub struct MemoryStore {
    books: DashMap<BookId, Vec<Reservation>>,
    /// Reverse lookup: reservation id → book id
    book_of: DashMap<ReservationId, BookId>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
            book_of: DashMap::new(),
        }
    }

    pub fn reservation_count(&self) -> usize {
        self.book_of.len()
    }

    pub fn get(&self, id: &ReservationId) -> Option<Reservation> {
        let book_id = *self.book_of.get(id)?.value();
        let waitlist = self.books.get(&book_id)?;
        waitlist.iter().find(|r| r.id == *id).cloned()
    }

    pub fn waitlist(&self, book_id: BookId) -> Vec<Reservation> {
        self.books
            .get(&book_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Every reservation, ordered by book then position.
    pub fn snapshot(&self) -> Vec<Reservation> {
        let mut all: Vec<Reservation> = self
            .books
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        all.sort_by_key(|r| (r.book_id, r.position));
        all
    }

    pub fn by_customer(&self, customer_id: CustomerId) -> Vec<Reservation> {
        let mut found: Vec<Reservation> = self
            .books
            .iter()
            .flat_map(|e| {
                e.value()
                    .iter()
                    .filter(|r| r.customer_id == customer_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by_key(|r| (r.book_id, r.position));
        found
    }

    pub fn by_customer_and_book(&self, customer_id: CustomerId, book_id: BookId) -> Option<Reservation> {
        self.books
            .get(&book_id)?
            .iter()
            .find(|r| r.customer_id == customer_id)
            .cloned()
    }

    /// Add a record that already carries its id.
    pub fn put(&self, reservation: Reservation) {
        let mut waitlist = self.books.entry(reservation.book_id).or_default();
        self.book_of.insert(reservation.id, reservation.book_id);
        match waitlist.iter_mut().find(|r| r.id == reservation.id) {
            Some(existing) => *existing = reservation,
            None => waitlist.push(reservation),
        }
    }

    /// Check a batch against current state without touching anything.
    pub fn validate(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        for r in &batch.saved {
            if r.book_id != batch.book_id {
                return Err(StoreError::BookMismatch {
                    id: r.id,
                    expected: batch.book_id,
                    actual: r.book_id,
                });
            }
            if let Some(actual) = self.book_of.get(&r.id).map(|e| *e.value())
                && actual != batch.book_id
            {
                return Err(StoreError::BookMismatch {
                    id: r.id,
                    expected: batch.book_id,
                    actual,
                });
            }
        }
        for id in &batch.deleted {
            match self.book_of.get(id).map(|e| *e.value()) {
                None => return Err(StoreError::UnknownReservation(*id)),
                Some(actual) if actual != batch.book_id => {
                    return Err(StoreError::BookMismatch {
                        id: *id,
                        expected: batch.book_id,
                        actual,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Validate, then apply the whole batch under the book's entry lock.
    ///
    /// The id index is updated while that lock is held, so a reader that sees
    /// a record in the waitlist can also find it by id. Lock order is always
    /// `books` entry, then `book_of`; nothing takes them the other way round.
    pub fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.validate(batch)?;
        {
            let mut waitlist = self.books.entry(batch.book_id).or_default();
            waitlist.retain(|r| !batch.deleted.contains(&r.id));
            for id in &batch.deleted {
                self.book_of.remove(id);
            }
            for saved in &batch.saved {
                self.book_of.insert(saved.id, saved.book_id);
                match waitlist.iter_mut().find(|r| r.id == saved.id) {
                    Some(existing) => *existing = saved.clone(),
                    None => waitlist.push(saved.clone()),
                }
            }
        }
        self.books.remove_if(&batch.book_id, |_, waitlist| waitlist.is_empty());
        Ok(())
    }

    pub fn apply_event(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::ReservationInserted(r) => {
                self.put(r.clone());
                Ok(())
            }
            Event::BatchCommitted(batch) => self.apply(batch),
        }
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn find_all(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.snapshot())
    }

    async fn find_by_id(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.get(&id))
    }

    async fn find_all_by_book_id(&self, book_id: BookId) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.waitlist(book_id))
    }

    async fn find_all_by_customer_id(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.by_customer(customer_id))
    }

    async fn find_by_customer_id_and_book_id(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.by_customer_and_book(customer_id, book_id))
    }

    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        let reservation = new.into_reservation(Ulid::new());
        self.put(reservation.clone());
        Ok(reservation)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.apply(&batch)
    }
}
