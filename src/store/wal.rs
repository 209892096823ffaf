use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{MemoryStore, ReservationStore, StoreError};

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    #[cfg(test)]
    FailNextSync,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until a command arrives.
/// 2. Buffer every Append that is immediately available.
/// 3. One flush_sync for the whole group, then answer every sender.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut group = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => group.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(group.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_group(&mut wal, &group);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in group {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// One fsync for the whole group. On failure the WAL has already rolled the
/// group back, so none of it can reappear on replay.
fn flush_group(wal: &mut Wal<Event>, group: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in group {
        wal.append_buffered(event)?;
    }
    wal.flush_sync()
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::FailNextSync => wal.fail_next_sync(),
        WalCommand::Append { .. } => unreachable!("appends are grouped by the writer loop"),
    }
}

/// A [`MemoryStore`] whose writes are made durable in a WAL before they are
/// applied. Reopening the same path replays the log.
pub struct WalStore {
    state: MemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared across append + apply; compaction holds it
    /// exclusively so the snapshot and the rewritten log agree.
    gate: RwLock<()>,
}

impl WalStore {
    /// Must be called inside a Tokio runtime: spawns the WAL writer task.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events: Vec<Event> = Wal::replay(path)?;
        let state = MemoryStore::new();
        for event in &events {
            if let Err(e) = state.apply_event(event) {
                tracing::warn!("WAL replay skipped event for book {}: {e}", event.book_id());
            }
        }
        tracing::info!(
            "replayed {} WAL events, {} reservations",
            events.len(),
            state.reservation_count()
        );

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state,
            wal_tx,
            gate: RwLock::new(()),
        })
    }

    async fn wal_append(&self, event: Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the WAL as one insert per live reservation.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        let events: Vec<Event> = self
            .state
            .snapshot()
            .into_iter()
            .map(Event::ReservationInserted)
            .collect();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    #[cfg(test)]
    async fn fail_next_sync(&self) {
        let _ = self.wal_tx.send(WalCommand::FailNextSync).await;
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn find_all(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.state.snapshot())
    }

    async fn find_by_id(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.state.get(&id))
    }

    async fn find_all_by_book_id(&self, book_id: BookId) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.state.waitlist(book_id))
    }

    async fn find_all_by_customer_id(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.state.by_customer(customer_id))
    }

    async fn find_by_customer_id_and_book_id(
        &self,
        customer_id: CustomerId,
        book_id: BookId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.state.by_customer_and_book(customer_id, book_id))
    }

    async fn insert(&self, new: NewReservation) -> Result<Reservation, StoreError> {
        let _shared = self.gate.read().await;
        let reservation = new.into_reservation(Ulid::new());
        self.wal_append(Event::ReservationInserted(reservation.clone()))
            .await?;
        self.state.put(reservation.clone());
        Ok(reservation)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let _shared = self.gate.read().await;
        self.state.validate(&batch)?;
        self.wal_append(Event::BatchCommitted(batch.clone())).await?;
        self.state.apply(&batch)
    }
}
