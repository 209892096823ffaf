use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use proptest::prelude::*;
use ulid::Ulid;

use waitlist::clock::FixedClock;
use waitlist::engine::{Engine, EngineError, end_of_priority, is_contiguous};
use waitlist::model::{BookId, CustomerId, ReservationRequest};
use waitlist::notify::NotifyHub;
use waitlist::oracle::StaticOracle;
use waitlist::service::Waitlist;
use waitlist::store::{MemoryStore, WalStore};

// ── Test infrastructure ──────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn request(book_id: BookId, customer_id: CustomerId) -> ReservationRequest {
    ReservationRequest {
        book_id,
        customer_id,
        customer_first_name: format!("Reader{customer_id}"),
        customer_last_name: "Test".into(),
        customer_email: format!("reader{customer_id}@library.test"),
        book_title: format!("Volume {book_id}"),
    }
}

fn temp_wal(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("waitlist_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

struct Service {
    waitlist: Arc<Waitlist>,
    oracle: Arc<StaticOracle>,
    hub: Arc<NotifyHub>,
    clock: Arc<FixedClock>,
}

fn service_over(store: Arc<dyn waitlist::store::ReservationStore>) -> Service {
    let hub = Arc::new(NotifyHub::new());
    let clock = Arc::new(FixedClock::at(date(2024, 6, 4))); // Tuesday
    let oracle = Arc::new(StaticOracle::new());
    let engine = Arc::new(
        Engine::new(store, hub.clone())
            .with_clock(clock.clone())
            .with_lock_timeout(Duration::from_secs(2)),
    );
    Service {
        waitlist: Arc::new(Waitlist::new(engine, oracle.clone())),
        oracle,
        hub,
        clock,
    }
}

// ── Service flows ────────────────────────────────────────────

#[tokio::test]
async fn reserve_uses_oracle_predictions_and_copies() {
    let s = service_over(Arc::new(MemoryStore::new()));
    s.oracle
        .set_predicted_return_dates(1, vec![date(2024, 6, 20), date(2024, 6, 10)]);

    let a = s.waitlist.reserve(request(1, 1)).await.unwrap();
    let b = s.waitlist.reserve(request(1, 2)).await.unwrap();
    assert_eq!(a.soon_disponibility_date, date(2024, 6, 10));
    assert_eq!(b.soon_disponibility_date, date(2024, 6, 20));
    assert_eq!(a.end_of_priority, None);

    assert!(matches!(
        s.waitlist.reserve(request(1, 3)).await,
        Err(EngineError::InvalidDateSequence { .. })
    ));
    assert!(matches!(
        s.waitlist.reserve(request(1, 1)).await,
        Err(EngineError::AlreadyReserved { .. })
    ));
}

#[tokio::test]
async fn returned_copy_notifies_front_of_line() {
    let s = service_over(Arc::new(MemoryStore::new()));
    let mut notices = s.hub.subscribe(2);
    for customer in 1..=3 {
        s.waitlist.reserve(request(2, customer)).await.unwrap();
    }

    s.oracle.set_available_copies(2, 1);
    let refresh = s.waitlist.copies_changed(2).await.unwrap();
    assert_eq!(refresh.updated.len(), 1);
    assert_eq!(refresh.updated[0].customer_id, 1);

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.email, "reader1@library.test");
    assert_eq!(notice.book_title, "Volume 2");
    assert_eq!(notice.deadline, date(2024, 6, 6));
    assert!(notice.body().contains("Volume 2"));
}

#[tokio::test]
async fn cancel_and_release_reindex_with_fresh_dates() {
    let s = service_over(Arc::new(MemoryStore::new()));
    for customer in 1..=4 {
        s.waitlist.reserve(request(3, customer)).await.unwrap();
    }

    let fresh = vec![date(2024, 7, 1), date(2024, 7, 2), date(2024, 7, 3)];
    s.oracle.set_predicted_return_dates(3, fresh.clone());
    s.waitlist.cancel(2, 3).await.unwrap();

    let list = s.waitlist.find_all_by_book_id(3).await.unwrap();
    assert_eq!(
        list.iter().map(|r| (r.customer_id, r.position)).collect::<Vec<_>>(),
        vec![(1, 1), (3, 2), (4, 3)]
    );
    assert_eq!(
        list.iter().map(|r| r.soon_disponibility_date).collect::<Vec<_>>(),
        fresh
    );

    s.waitlist.release(list[0].id).await.unwrap();
    let list = s.waitlist.find_all_by_book_id(3).await.unwrap();
    assert!(is_contiguous(&list));
    assert_eq!(list[0].customer_id, 3);
    assert!(!s.waitlist.exists(1, 3).await.unwrap());
}

#[tokio::test]
async fn return_dates_changed_overwrites_every_entry() {
    let s = service_over(Arc::new(MemoryStore::new()));
    for customer in 1..=2 {
        s.waitlist.reserve(request(4, customer)).await.unwrap();
    }
    s.oracle
        .set_predicted_return_dates(4, vec![date(2024, 8, 2), date(2024, 8, 1)]);
    let updated = s.waitlist.return_dates_changed(4).await.unwrap();
    assert_eq!(updated.len(), 2);

    let list = s.waitlist.find_all_by_book_id(4).await.unwrap();
    assert_eq!(list[0].soon_disponibility_date, date(2024, 8, 1));
    assert_eq!(list[1].soon_disponibility_date, date(2024, 8, 2));
}

#[tokio::test]
async fn expiry_sweep_spans_books() {
    let s = service_over(Arc::new(MemoryStore::new()));
    s.oracle.set_available_copies(5, 1);
    s.oracle.set_available_copies(6, 1);
    for book in [5, 6] {
        s.waitlist.reserve(request(book, 1)).await.unwrap();
        s.waitlist.reserve(request(book, 2)).await.unwrap();
    }

    // Nothing expires on the deadline itself.
    s.clock.set(date(2024, 6, 6).and_hms_opt(23, 0, 0).unwrap());
    let sweep = s.waitlist.release_expired().await.unwrap();
    assert!(sweep.released.is_empty());

    s.clock.set(date(2024, 6, 7).and_hms_opt(7, 0, 0).unwrap());
    let sweep = s.waitlist.release_expired().await.unwrap();
    assert_eq!(sweep.released.len(), 2);
    assert_eq!(sweep.refreshed.len(), 2);
    assert!(sweep.errors.is_empty());

    for book in [5, 6] {
        let list = s.waitlist.find_all_by_book_id(book).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].customer_id, 2);
        assert_eq!(list[0].position, 1);
        assert_eq!(list[0].end_of_priority, Some(date(2024, 6, 9)));
    }
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn wal_store_survives_restart() {
    let path = temp_wal("restart.wal");
    let ids = {
        let store = Arc::new(WalStore::open(&path).unwrap());
        let s = service_over(store);
        s.oracle.set_available_copies(7, 1);
        let mut ids = Vec::new();
        for customer in 1..=3 {
            ids.push(s.waitlist.reserve(request(7, customer)).await.unwrap().id);
        }
        s.waitlist.cancel(1, 7).await.unwrap();
        s.waitlist.copies_changed(7).await.unwrap();
        ids
    };

    let store = Arc::new(WalStore::open(&path).unwrap());
    let s = service_over(store);
    let list = s.waitlist.find_all_by_book_id(7).await.unwrap();
    assert_eq!(
        list.iter().map(|r| (r.id, r.position)).collect::<Vec<_>>(),
        vec![(ids[1], 1), (ids[2], 2)]
    );
    assert_eq!(list[0].end_of_priority, Some(date(2024, 6, 6)));
    assert!(matches!(
        s.waitlist.find_by_id(ids[0]).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn compacted_wal_replays_same_state() {
    let path = temp_wal("compact.wal");
    let before = {
        let store = Arc::new(WalStore::open(&path).unwrap());
        let s = service_over(store.clone());
        for customer in 1..=6 {
            s.waitlist.reserve(request(8, customer)).await.unwrap();
        }
        s.waitlist.cancel(3, 8).await.unwrap();
        store.compact().await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
        s.waitlist.find_all().await.unwrap()
    };

    let s = service_over(Arc::new(WalStore::open(&path).unwrap()));
    assert_eq!(s.waitlist.find_all().await.unwrap(), before);
}

// ── Concurrency ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_traffic_across_books_stays_contiguous() {
    let path = temp_wal("concurrent.wal");
    let s = service_over(Arc::new(WalStore::open(&path).unwrap()));

    let mut tasks = Vec::new();
    for book in 0..4u64 {
        for customer in 0..25u64 {
            let waitlist = s.waitlist.clone();
            tasks.push(tokio::spawn(async move {
                waitlist.reserve(request(book, customer)).await.map(|_| ())
            }));
        }
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let mut tasks = Vec::new();
    for book in 0..4u64 {
        for customer in (0..25u64).filter(|c| c % 3 == 0) {
            let waitlist = s.waitlist.clone();
            tasks.push(tokio::spawn(async move {
                waitlist.cancel(customer, book).await.map(|_| ())
            }));
        }
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    for book in 0..4u64 {
        let list = s.waitlist.find_all_by_book_id(book).await.unwrap();
        assert_eq!(list.len(), 16);
        assert!(is_contiguous(&list));
        assert!(list.iter().all(|r| r.customer_id % 3 != 0));
    }
}

// ── Properties ───────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Reserve(CustomerId),
    Cancel(CustomerId),
    Copies(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..12u64).prop_map(Op::Reserve),
        2 => (0..12u64).prop_map(Op::Cancel),
        1 => (0..4u32).prop_map(Op::Copies),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn waitlist_invariants_hold(ops in proptest::collection::vec(op(), 1..60)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let s = service_over(Arc::new(MemoryStore::new()));
            let deadline = end_of_priority(date(2024, 6, 4));
            for op in ops {
                let before = s.waitlist.find_all_by_book_id(1).await.unwrap();
                match op {
                    Op::Reserve(c) => {
                        let present = before.iter().any(|r| r.customer_id == c);
                        match s.waitlist.reserve(request(1, c)).await {
                            Ok(r) => {
                                prop_assert!(!present);
                                prop_assert_eq!(r.position as usize, before.len() + 1);
                            }
                            Err(EngineError::AlreadyReserved { .. }) => prop_assert!(present),
                            Err(e) => prop_assert!(false, "reserve failed: {}", e),
                        }
                    }
                    Op::Cancel(c) => {
                        let present = before.iter().any(|r| r.customer_id == c);
                        match s.waitlist.cancel(c, 1).await {
                            Ok(r) => prop_assert!(present && r.customer_id == c),
                            Err(EngineError::NotFound(_)) => prop_assert!(!present),
                            Err(e) => prop_assert!(false, "cancel failed: {}", e),
                        }
                    }
                    Op::Copies(k) => {
                        s.oracle.set_available_copies(1, k);
                        s.waitlist.copies_changed(1).await.unwrap();
                        let after = s.waitlist.find_all_by_book_id(1).await.unwrap();
                        let window = before.len().min(k as usize);
                        for (i, r) in after.iter().enumerate() {
                            if i < window {
                                prop_assert_eq!(r.end_of_priority, Some(deadline));
                            } else {
                                prop_assert_eq!(r, &before[i]);
                            }
                        }
                    }
                }
                let list = s.waitlist.find_all_by_book_id(1).await.unwrap();
                prop_assert!(is_contiguous(&list));
                let mut customers: Vec<_> = list.iter().map(|r| r.customer_id).collect();
                customers.sort_unstable();
                customers.dedup();
                prop_assert_eq!(customers.len(), list.len());
            }
            Ok(())
        })?;
    }
}
