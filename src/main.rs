mod api;
mod client;
mod config;
mod connectivity;
mod db;
mod error;
mod logging;
mod metrics;
mod models;
mod normalize;
mod notifier;
mod permission;
mod queue;
mod scheduler;
mod settings;
mod timing;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    signal,
    sync::{mpsc, watch},
};
use tracing::{error, info};

use crate::notifier::{NotificationOptions, TimerNotificationCenter};
use crate::scheduler::PassOutcome;

fn main() -> Result<()> {
    let worker_threads = std::env::var("TOKIO_WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(num_cpus::get);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .thread_name("mindful-notifier")
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async {
        logging::setup_logging();

        // Load environment variables from .env file if present
        dotenv::dotenv().ok();

        info!(worker_threads, "Starting wellbeing notification agent");

        let config = config::Config::from_env()?;

        let db_pool = db::init_db_pool(&config.database_url)
            .await
            .context("Failed to open local database")?;

        let settings = Arc::new(settings::SettingsStore::new(db_pool.clone()));

        let api_client = Arc::new(
            client::ApiClient::new(
                &config.api_base_url,
                config.api_token.clone(),
                config.http_timeout,
            )
            .context("Failed to create HTTP client")?,
        );

        // Notification channels are configured exactly once, here
        let (delivery_tx, delivery_rx) = mpsc::channel(256);
        let center = TimerNotificationCenter::initialize(
            NotificationOptions {
                device_capable: config.notifications_supported,
                permission: config.notification_permission,
            },
            delivery_tx,
        );

        let connectivity = Arc::new(
            connectivity::ConnectivityMonitor::new(
                &config.connectivity_probe_url,
                config.connectivity_probe_interval,
                config.http_timeout,
            )
            .context("Failed to create connectivity monitor")?,
        );

        let request_queue = Arc::new(queue::OfflineQueue::new(
            db_pool.clone(),
            connectivity.clone(),
            api_client.clone(),
        ));

        let smart_scheduler = Arc::new(scheduler::SmartScheduler::new(
            api_client.clone(),
            Arc::new(center.clone()),
            settings.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let delivery_handle = tokio::spawn(notifier::run_delivery_loop(delivery_rx, center.channels()));

        let monitor = connectivity.clone();
        let monitor_shutdown = shutdown_rx.clone();
        let connectivity_handle = tokio::spawn(async move {
            monitor.run(monitor_shutdown).await;
        });

        let drain_handle = tokio::spawn(queue::run_reconnect_drain(
            request_queue.clone(),
            shutdown_rx.clone(),
        ));

        let scheduler_clone = smart_scheduler.clone();
        let user_id = config.user_id.clone();
        let schedule_interval = config.schedule_interval;
        let mut schedule_shutdown = shutdown_rx.clone();
        let schedule_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(schedule_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let PassOutcome::Blocked =
                            scheduler_clone.schedule_smart_notifications(&user_id).await
                        {
                            info!("Reminders disabled on this device until permission changes");
                        }
                    }
                    _ = schedule_shutdown.changed() => break,
                }
            }
        });

        let api_state = Arc::new(api::ApiState {
            user_id: config.user_id.clone(),
            settings: settings.clone(),
            scheduler: smart_scheduler.clone(),
            queue: request_queue.clone(),
            center: center.clone(),
        });
        let api_router = api::create_api_router(api_state);

        let listener = tokio::net::TcpListener::bind(&config.control_bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", config.control_bind_address))?;
        info!("Starting control API on {}", config.control_bind_address);

        let mut api_shutdown = shutdown_rx.clone();
        let api_handle = tokio::spawn(async move {
            let serve = axum::serve(listener, api_router).with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                error!("Control API stopped with error: {}", e);
            }
        });

        signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Received shutdown signal, shutting down gracefully");

        let _ = shutdown_tx.send(true);
        let _ = tokio::join!(
            connectivity_handle,
            drain_handle,
            schedule_handle,
            api_handle
        );

        // Pending timers hold the delivery sender; stop them before the loop
        drop(smart_scheduler);
        if let Err(e) = notifier::NotificationCenter::cancel_all(&center).await {
            error!("Failed to cancel pending notifications: {}", e);
        }
        drop(center);
        if tokio::time::timeout(Duration::from_secs(5), delivery_handle)
            .await
            .is_err()
        {
            error!("Notification delivery loop did not stop in time");
        }

        info!("Shutdown complete");
        Ok(())
    })
}
