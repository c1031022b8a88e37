use reqwest::Client as HttpClient;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::models::ConnectivityStatus;

pub trait Connectivity: Send + Sync {
    fn status(&self) -> ConnectivityStatus;

    /// Receiver that observes every status change.
    fn subscribe(&self) -> watch::Receiver<ConnectivityStatus>;
}

/// Tracks reachability of the remote API by probing it periodically.
///
/// Any HTTP answer counts as online, even an error status; only a failed
/// connection or a timeout counts as offline. Starts out offline until the
/// first probe completes.
pub struct ConnectivityMonitor {
    http_client: HttpClient,
    probe_url: String,
    interval: Duration,
    status_tx: watch::Sender<ConnectivityStatus>,
}

impl ConnectivityMonitor {
    pub fn new(probe_url: &str, interval: Duration, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            http_client: HttpClient::builder().timeout(timeout).build()?,
            probe_url: probe_url.to_string(),
            interval,
            status_tx: watch::Sender::new(ConnectivityStatus::Offline),
        })
    }

    pub async fn probe(&self) -> ConnectivityStatus {
        match self.http_client.head(&self.probe_url).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Connectivity probe answered");
                ConnectivityStatus::Online
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                ConnectivityStatus::Offline
            }
        }
    }

    /// Probes once and publishes the result if it changed.
    pub async fn refresh(&self) -> ConnectivityStatus {
        let status = self.probe().await;
        self.publish(status);
        status
    }

    fn publish(&self, status: ConnectivityStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });

        if changed {
            match status {
                ConnectivityStatus::Online => info!(url = %self.probe_url, "Remote API reachable"),
                ConnectivityStatus::Offline => {
                    warn!(url = %self.probe_url, "Remote API unreachable, requests will be queued")
                }
            }
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.probe_url, interval = ?self.interval, "Starting connectivity monitor");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("Connectivity monitor stopped");
    }
}

impl Connectivity for ConnectivityMonitor {
    fn status(&self) -> ConnectivityStatus {
        *self.status_tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status_tx.subscribe()
    }
}
