use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type BookId = u64;
pub type CustomerId = u64;
pub type ReservationId = Ulid;

/// What a caller supplies to join a book's waitlist. Contact and title fields
/// are a snapshot taken at creation time and never refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub book_id: BookId,
    pub customer_id: CustomerId,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_email: String,
    pub book_title: String,
}

/// A reservation computed by the engine but not yet stored (no id yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub request: ReservationRequest,
    pub creation_reservation_date: NaiveDateTime,
    pub position: u32,
    pub soon_disponibility_date: NaiveDate,
    pub end_of_priority: Option<NaiveDate>,
}

impl NewReservation {
    pub fn into_reservation(self, id: ReservationId) -> Reservation {
        let ReservationRequest {
            book_id,
            customer_id,
            customer_first_name,
            customer_last_name,
            customer_email,
            book_title,
        } = self.request;
        Reservation {
            id,
            book_id,
            customer_id,
            customer_first_name,
            customer_last_name,
            customer_email,
            book_title,
            creation_reservation_date: self.creation_reservation_date,
            position: self.position,
            soon_disponibility_date: self.soon_disponibility_date,
            end_of_priority: self.end_of_priority,
        }
    }
}

/// One customer's place in one book's waitlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub book_id: BookId,
    pub customer_id: CustomerId,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_email: String,
    pub book_title: String,
    pub creation_reservation_date: NaiveDateTime,
    /// 1-based rank among the reservations of `book_id`.
    pub position: u32,
    /// When this customer's copy is expected back.
    pub soon_disponibility_date: NaiveDate,
    /// Last day to claim a copy. Only set inside the priority window.
    pub end_of_priority: Option<NaiveDate>,
}

impl Reservation {
    pub fn is_priority_expired(&self, today: NaiveDate) -> bool {
        self.end_of_priority.is_some_and(|deadline| deadline < today)
    }
}

/// An atomic write scoped to a single book: removals and upserts are applied
/// together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub book_id: BookId,
    pub deleted: Vec<ReservationId>,
    pub saved: Vec<Reservation>,
}

impl WriteBatch {
    pub fn new(book_id: BookId) -> Self {
        Self {
            book_id,
            deleted: Vec::new(),
            saved: Vec::new(),
        }
    }

    pub fn delete(mut self, id: ReservationId) -> Self {
        self.deleted.push(id);
        self
    }

    pub fn save_all(mut self, reservations: impl IntoIterator<Item = Reservation>) -> Self {
        self.saved.extend(reservations);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.saved.is_empty()
    }
}

/// The WAL record format. A batch is a single record, so replay never sees
/// half of one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationInserted(Reservation),
    BatchCommitted(WriteBatch),
}

impl Event {
    pub fn book_id(&self) -> BookId {
        match self {
            Event::ReservationInserted(r) => r.book_id,
            Event::BatchCommitted(batch) => batch.book_id,
        }
    }
}

/// Identifies the target of a lookup that came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationRef {
    Id(ReservationId),
    CustomerBook {
        customer_id: CustomerId,
        book_id: BookId,
    },
}

impl std::fmt::Display for ReservationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationRef::Id(id) => write!(f, "reservation {id}"),
            ReservationRef::CustomerBook {
                customer_id,
                book_id,
            } => write!(f, "reservation of customer {customer_id} for book {book_id}"),
        }
    }
}
