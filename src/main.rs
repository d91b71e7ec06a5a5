// Meetwatch - local meeting alert scheduler
// Binary entry point: wires the schedule store, the scheduler loop, and the
// logging dispatcher together, with Ctrl-C shutdown.

use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use meetwatch::utils::logging;
use meetwatch::{LogNotifier, ScheduleConfig, ScheduleStore, Scheduler, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = logging::init_logging();

    let config = ScheduleConfig::from_env()?;
    let clock = Arc::new(SystemClock);
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(ScheduleConfig::default_db_path);

    info!("Starting meetwatch with schedule store at {}", db_path.display());

    let store = match ScheduleStore::open(&db_path, clock.clone(), config.persist_timeout).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let err = anyhow::Error::new(e);
            logging::log_error_with_context(&err, "schedule-store");
            return Err(err);
        }
    };
    if store.recovered_from_corruption() {
        log::error!("Persisted schedule was unreadable and has been reset; upcoming meetings must be rescheduled");
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_token.cancel();
        }
    });

    let scheduler = Scheduler::new(store, Arc::new(LogNotifier), clock, config);
    scheduler.run(shutdown).await;

    Ok(())
}
