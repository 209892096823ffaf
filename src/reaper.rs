use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::oracle::{AvailabilitySnapshot, OracleError, SnapshotChanges, StaticOracle};
use crate::service::Waitlist;
use crate::store::WalStore;

/// Background task that periodically releases reservations whose priority
/// deadline has passed.
pub async fn run_reaper(waitlist: Arc<Waitlist>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match waitlist.release_expired().await {
            Ok(sweep) if !sweep.released.is_empty() => {
                info!(
                    "reaper released {} reservations across {} books",
                    sweep.released.len(),
                    sweep.refreshed.len()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("reaper sweep failed: {e}"),
        }
    }
}

/// Load the availability file into `oracle`, then refresh every book whose
/// data moved: return dates first, then copy counts, so promoted customers
/// are notified with current dates. A failed refresh of one book is logged
/// and does not stop the others.
pub async fn sync_availability(
    waitlist: &Waitlist,
    oracle: &StaticOracle,
    path: &Path,
) -> Result<SnapshotChanges, OracleError> {
    let snapshot = AvailabilitySnapshot::read(path).await?;
    let changes = oracle.load(snapshot);

    for &book_id in &changes.return_dates {
        if let Err(e) = waitlist.return_dates_changed(book_id).await {
            warn!("date refresh for book {book_id} failed: {e}");
        }
    }
    for &book_id in &changes.copies {
        match waitlist.copies_changed(book_id).await {
            Ok(refresh) => debug!(
                "book {book_id}: {} in priority window, {} notified",
                refresh.updated.len(),
                refresh.notified.len()
            ),
            Err(e) => warn!("capacity refresh for book {book_id} failed: {e}"),
        }
    }
    Ok(changes)
}

/// Background task that reloads the availability file on an interval.
pub async fn run_availability_sync(
    waitlist: Arc<Waitlist>,
    oracle: Arc<StaticOracle>,
    path: PathBuf,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match sync_availability(&waitlist, &oracle, &path).await {
            Ok(changes) if changes != SnapshotChanges::default() => info!(
                "availability reloaded: {} books with new copy counts, {} with new return dates",
                changes.copies.len(),
                changes.return_dates.len()
            ),
            Ok(_) => {}
            Err(e) => warn!("availability reload from {} failed: {e}", path.display()),
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
