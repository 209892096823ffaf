use std::sync::Arc;

use tracing::{info, warn};

use waitlist::config::Config;
use waitlist::engine::Engine;
use waitlist::notify::{NOTICE_SUBJECT, NotifyHub};
use waitlist::oracle::StaticOracle;
use waitlist::reaper;
use waitlist::service::Waitlist;
use waitlist::store::WalStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    waitlist::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(WalStore::open(&config.wal_path())?);
    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(
        Engine::new(store.clone(), hub.clone()).with_lock_timeout(config.lock_timeout),
    );
    let oracle = Arc::new(StaticOracle::new());
    let waitlist = Arc::new(Waitlist::new(engine, oracle.clone()));

    info!("waitlist daemon started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  reaper_interval: {:?}", config.reaper_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    match &config.oracle_file {
        Some(path) => {
            info!("  availability: {} (every {:?})", path.display(), config.oracle_reload_interval);
            if let Err(e) = reaper::sync_availability(&waitlist, &oracle, path).await {
                warn!("initial availability load failed: {e}");
            }
            tokio::spawn(reaper::run_availability_sync(
                waitlist.clone(),
                oracle.clone(),
                path.clone(),
                config.oracle_reload_interval,
            ));
        }
        None => warn!(
            "WAITLIST_ORACLE_FILE not set: no copies or return dates known, expired reservations are released without promoting anyone"
        ),
    }

    let mut notices = hub.subscribe_all();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            info!(
                "notice to {} ({}): {}\n{}",
                notice.email,
                notice.reservation_id,
                NOTICE_SUBJECT,
                notice.body()
            );
        }
    });
    tokio::spawn(reaper::run_reaper(waitlist.clone(), config.reaper_interval));
    tokio::spawn(reaper::run_compactor(store.clone(), config.compact_threshold));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await?;
        }
        Ok::<(), std::io::Error>(())
    };
    shutdown.await?;

    info!("shutdown signal received");
    if let Err(e) = store.compact().await {
        warn!("final WAL compaction failed: {e}");
    }
    info!("waitlist stopped");
    Ok(())
}
