use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::model::{BookId, Reservation, ReservationId};

const CHANNEL_CAPACITY: usize = 256;

pub const NOTICE_SUBJECT: &str = "Reservation - your book is available";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Tells a customer their reserved book can be picked up, and until when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityNotice {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub reserved_on: NaiveDateTime,
    pub book_title: String,
    pub deadline: NaiveDate,
}

impl PriorityNotice {
    pub fn for_reservation(reservation: &Reservation, deadline: NaiveDate) -> Self {
        Self {
            reservation_id: reservation.id,
            book_id: reservation.book_id,
            email: reservation.customer_email.clone(),
            first_name: reservation.customer_first_name.clone(),
            last_name: reservation.customer_last_name.clone(),
            reserved_on: reservation.creation_reservation_date,
            book_title: reservation.book_title.clone(),
            deadline,
        }
    }

    pub fn body(&self) -> String {
        format!(
            "Hello {} {},\n\n\
             Following your reservation of {}, the book \"{}\" is now available at the library.\n\
             You have until {} to come and borrow it. After that day you will need to place a new reservation.\n\
             Don't forget to bring back your other loans.\n\n\
             This message was sent automatically, please do not reply.",
            self.first_name,
            self.last_name,
            mail_date(self.reserved_on.date()),
            self.book_title,
            mail_date(self.deadline),
        )
    }
}

/// `05 Mar 2024`
pub fn mail_date(date: NaiveDate) -> String {
    date.format("%d %b %Y").to_string()
}

/// Delivers priority notices. The engine decides when, implementations decide how.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &PriorityNotice) -> Result<(), NotifyError>;
}

/// Broadcast hub: per-book channels plus one channel carrying every notice.
pub struct NotifyHub {
    channels: DashMap<BookId, broadcast::Sender<PriorityNotice>>,
    all: broadcast::Sender<PriorityNotice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one book's notices. Creates the channel if needed.
    pub fn subscribe(&self, book_id: BookId) -> broadcast::Receiver<PriorityNotice> {
        let sender = self
            .channels
            .entry(book_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<PriorityNotice> {
        self.all.subscribe()
    }

    /// No-op if nobody is listening. A book channel whose listeners are all
    /// gone is dropped here.
    pub fn send(&self, notice: &PriorityNotice) {
        let abandoned = match self.channels.get(&notice.book_id) {
            Some(sender) => sender.send(notice.clone()).is_err(),
            None => false,
        };
        if abandoned {
            self.channels
                .remove_if(&notice.book_id, |_, sender| sender.receiver_count() == 0);
        }
        let _ = self.all.send(notice.clone());
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn notify(&self, notice: &PriorityNotice) -> Result<(), NotifyError> {
        self.send(notice);
        Ok(())
    }
}
