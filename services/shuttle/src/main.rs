use std::env;
use std::time::Duration;

use shuttle::checkpoint::Checkpoint;
use shuttle::db;
use shuttle::dispatcher::{Dispatcher, LogMergeHandler};
use shuttle::subscriber::Subscriber;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Backoff between restart attempts after a transient failure.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Events buffered between subscriber and dispatcher before backpressure
/// reaches the socket.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let redis_url = env::var("REDIS_URL").expect("REDIS_URL must be set");
    let hub_ws_url = env::var("HUB_WS_URL").expect("HUB_WS_URL must be set");
    let hub_id = env::var("HUB_ID").unwrap_or_else(|_| "default".to_owned());

    info!("connecting to database...");
    let pool = db::create_pool(&database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let mut checkpoint = Checkpoint::connect(&redis_url)
        .await
        .expect("failed to connect to checkpoint store");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Restart policy: every attempt resumes from the last durable
    // checkpoint; replayed duplicates are absorbed by the store.
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let last_id = match checkpoint.load(&hub_id).await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "checkpoint load failed");
                tokio::time::sleep(RESTART_BACKOFF).await;
                continue;
            }
        };
        let from_id = (last_id > 0).then_some(last_id);

        let subscriber = Subscriber::new(hub_ws_url.clone(), None);
        let mut dispatcher = Dispatcher::new(
            pool.clone(),
            checkpoint.clone(),
            hub_id.clone(),
            LogMergeHandler,
        );
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        info!(hub_id = %hub_id, ?from_id, "starting subscription");
        // Whichever side stops first cancels the other; an in-flight
        // transaction rolls back on drop and its event replays next round.
        tokio::select! {
            sub_result = subscriber.start(from_id, events_tx, shutdown_rx.clone()) => {
                if let Err(e) = sub_result {
                    error!(error = %e, transient = e.is_transient(), "subscriber stopped");
                }
            }
            disp_result = dispatcher.run(events_rx) => {
                if let Err(e) = disp_result {
                    error!(error = %e, "dispatcher stopped");
                }
            }
        }
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::time::sleep(RESTART_BACKOFF).await;
    }

    info!("shuttle shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
