mod deadline;
mod error;
mod locks;
mod mutations;
mod queries;
mod queue;

pub use deadline::{WEEKDAY_GRACE_DAYS, WEEKEND_GRACE_DAYS, end_of_priority};
pub use error::EngineError;
pub use locks::{BookLockGuard, BookLocks};
pub use queue::is_contiguous;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::{Notifier, NotifyError, PriorityNotice};
use crate::store::ReservationStore;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A priority notice that could not be delivered. The deadline it announced
/// stays in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFailure {
    pub reservation_id: ReservationId,
    pub error: NotifyError,
}

/// Outcome of a capacity refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapacityRefresh {
    /// Reservations now inside the priority window, in position order.
    pub updated: Vec<Reservation>,
    pub notified: Vec<ReservationId>,
    pub failed: Vec<NotificationFailure>,
}

/// The reservation-queue engine. Every mutation of a book's waitlist runs
/// under that book's lock, from the first read to the final write; queries
/// go straight to the store.
pub struct Engine {
    store: Arc<dyn ReservationStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: BookLocks,
    lock_timeout: Duration,
}

impl Engine {
    pub fn new(store: Arc<dyn ReservationStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
            locks: BookLocks::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    /// Serialize with every other mutation of `book_id`.
    pub async fn lock_book(&self, book_id: BookId) -> Result<BookLockGuard<'_>, EngineError> {
        let wait_start = std::time::Instant::now();
        let guard = self.locks.acquire(book_id, self.lock_timeout).await;
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());
        guard.ok_or_else(|| {
            warn!("lock timeout on book {book_id} after {:?}", self.lock_timeout);
            metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
            EngineError::LockTimeout(book_id)
        })
    }

    /// Send one notice per reservation, concurrently. Failures are logged and
    /// returned; nothing is rolled back.
    pub(super) async fn send_notices(
        &self,
        notices: Vec<PriorityNotice>,
    ) -> (Vec<ReservationId>, Vec<NotificationFailure>) {
        let sends = notices.iter().map(|n| self.notifier.notify(n));
        let results = futures::future::join_all(sends).await;

        let mut notified = Vec::new();
        let mut failed = Vec::new();
        for (notice, result) in notices.iter().zip(results) {
            match result {
                Ok(()) => {
                    metrics::counter!(crate::observability::NOTIFICATIONS_SENT_TOTAL).increment(1);
                    notified.push(notice.reservation_id);
                }
                Err(error) => {
                    warn!(
                        "priority notice for reservation {} ({}) failed: {error}",
                        notice.reservation_id, notice.email
                    );
                    metrics::counter!(crate::observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
                    failed.push(NotificationFailure {
                        reservation_id: notice.reservation_id,
                        error,
                    });
                }
            }
        }
        (notified, failed)
    }
}
