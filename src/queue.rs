use serde::Serialize;
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::client::RequestTransport;
use crate::connectivity::Connectivity;
use crate::db;
use crate::error::StoreError;
use crate::metrics;
use crate::models::{ConnectivityStatus, OutgoingRequest, PendingRequest};

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SubmitOutcome {
    Sent { response: Value },
    Queued { id: i64 },
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Replayed successfully but could not be removed; will be sent again.
    pub delete_failures: usize,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another drain was already running.
    Skipped,
}

/// Buffers API calls made while the remote API is unreachable and replays
/// them once it is back.
///
/// Delivery is at-least-once: a request stays queued until a replay
/// succeeds, whatever the reason for the failure.
pub struct OfflineQueue<C, T> {
    db_pool: Pool<Sqlite>,
    connectivity: Arc<C>,
    transport: Arc<T>,
    draining: Mutex<()>,
}

impl<C, T> OfflineQueue<C, T>
where
    C: Connectivity,
    T: RequestTransport + Send + Sync,
{
    pub fn new(db_pool: Pool<Sqlite>, connectivity: Arc<C>, transport: Arc<T>) -> Self {
        Self {
            db_pool,
            connectivity,
            transport,
            draining: Mutex::new(()),
        }
    }

    /// Sends `request` now, or persists it when offline or when the attempt
    /// fails. A request made while offline is never attempted here. Rejected
    /// requests are queued like lost ones; the next drain retries them.
    pub async fn submit(&self, request: OutgoingRequest) -> Result<SubmitOutcome, StoreError> {
        if self.connectivity.status() == ConnectivityStatus::Offline {
            let id = self.enqueue(&request).await?;
            return Ok(SubmitOutcome::Queued { id });
        }

        match self.transport.send(&request).await {
            Ok(response) => Ok(SubmitOutcome::Sent { response }),
            Err(e) => {
                warn!(
                    endpoint = %request.endpoint,
                    error = %e,
                    transient = e.is_transient(),
                    "Request failed, queueing for replay"
                );
                let id = self.enqueue(&request).await?;
                Ok(SubmitOutcome::Queued { id })
            }
        }
    }

    async fn enqueue(&self, request: &OutgoingRequest) -> Result<i64, StoreError> {
        let id = db::insert_pending_request(&self.db_pool, request).await?;
        metrics::REQUESTS_QUEUED.inc();
        info!(
            id,
            method = request.method.as_str(),
            endpoint = %request.endpoint,
            "Request queued for replay"
        );
        Ok(id)
    }

    pub async fn pending(&self) -> Result<Vec<PendingRequest>, StoreError> {
        db::get_pending_requests(&self.db_pool).await
    }

    /// Attempts every queued request once, oldest first. Successful ones are
    /// removed; failures stay as they are for the next drain.
    pub async fn drain(&self) -> Result<DrainOutcome, StoreError> {
        let Ok(_guard) = self.draining.try_lock() else {
            debug!("Drain already in progress, skipping");
            return Ok(DrainOutcome::Skipped);
        };

        let pending = db::get_pending_requests(&self.db_pool).await?;
        if pending.is_empty() {
            return Ok(DrainOutcome::Completed(DrainReport::default()));
        }
        info!(count = pending.len(), "Draining offline request queue");

        let mut report = DrainReport::default();
        for row in pending {
            report.attempted += 1;

            let request = match row.to_outgoing() {
                Ok(request) => request,
                Err(e) => {
                    warn!(id = row.id, error = %e, "Queued request body is unreadable, leaving it queued");
                    report.failed += 1;
                    metrics::REPLAY_FAILURES.inc();
                    continue;
                }
            };

            match self.transport.send(&request).await {
                Ok(_) => {
                    metrics::REQUESTS_REPLAYED.inc();
                    match db::delete_pending_request(&self.db_pool, row.id).await {
                        Ok(_) => report.succeeded += 1,
                        Err(e) => {
                            error!(id = row.id, error = %e, "Replayed request could not be removed from the queue");
                            report.delete_failures += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        id = row.id,
                        endpoint = %row.endpoint,
                        error = %e,
                        transient = e.is_transient(),
                        "Replay failed, request stays queued"
                    );
                    metrics::REPLAY_FAILURES.inc();
                    report.failed += 1;
                }
            }
        }

        report.remaining = db::count_pending_requests(&self.db_pool).await?;
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            remaining = report.remaining,
            "Offline queue drained"
        );
        Ok(DrainOutcome::Completed(report))
    }

    async fn drain_logged(&self) {
        if let Err(e) = self.drain().await {
            error!(error = %e, "Failed to drain offline queue");
        }
    }
}

/// Drains the queue every time connectivity comes back, and once at start
/// when already online.
pub async fn run_reconnect_drain<C, T>(
    queue: Arc<OfflineQueue<C, T>>,
    mut shutdown: watch::Receiver<bool>,
) where
    C: Connectivity,
    T: RequestTransport + Send + Sync,
{
    info!("Starting offline queue drain loop");
    let mut status_rx = queue.connectivity.subscribe();
    let mut last = *status_rx.borrow_and_update();

    if last == ConnectivityStatus::Online {
        queue.drain_logged().await;
    }

    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status_rx.borrow_and_update();
                if last == ConnectivityStatus::Offline && current == ConnectivityStatus::Online {
                    info!("Connectivity restored");
                    queue.drain_logged().await;
                }
                last = current;
            }
            _ = shutdown.changed() => break,
        }
    }

    info!("Offline queue drain loop stopped");
}
