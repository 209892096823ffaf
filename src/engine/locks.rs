use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::BookId;

/// One mutex per book, created on first use and dropped again once nobody
/// holds or waits for it. There is no lock spanning books.
#[derive(Default)]
pub struct BookLocks {
    locks: DashMap<BookId, Arc<Mutex<()>>>,
}

/// Exclusive access to one book's waitlist until dropped.
pub struct BookLockGuard<'a> {
    locks: &'a BookLocks,
    book_id: BookId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl BookLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait at most `timeout` for the book's lock. `None` on timeout.
    pub async fn acquire(&self, book_id: BookId, timeout: Duration) -> Option<BookLockGuard<'_>> {
        let mutex = self.locks.entry(book_id).or_default().value().clone();
        let acquired = tokio::time::timeout(timeout, mutex.lock_owned()).await;
        match acquired {
            Ok(guard) => Some(BookLockGuard {
                locks: self,
                book_id,
                guard: Some(guard),
            }),
            Err(_) => {
                // Our clone is gone; reclaim the entry if we were the last waiter.
                self.reclaim(book_id);
                None
            }
        }
    }

    /// Books with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn reclaim(&self, book_id: BookId) {
        self.locks
            .remove_if(&book_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl BookLockGuard<'_> {
    pub fn book_id(&self) -> BookId {
        self.book_id
    }
}

impl Drop for BookLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.reclaim(self.book_id);
    }
}
