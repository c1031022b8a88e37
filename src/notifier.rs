use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NotifyError;
use crate::metrics;
use crate::models::{
    Channel, DeliveredNotification, Importance, PermissionState, ScheduledNotification, Trigger,
};

/// The device's local notification facility.
#[trait_variant::make(NotificationCenter: Send)]
#[allow(dead_code)]
pub trait LocalNotificationCenter {
    fn is_device_capable(&self) -> bool;

    async fn permission_status(&self) -> PermissionState;

    /// Asks for permission if it has not been decided yet and returns the
    /// resulting state.
    async fn request_permission(&self) -> PermissionState;

    /// Schedules `notification`, replacing any pending one with the same
    /// identifier.
    async fn schedule(&self, notification: ScheduledNotification) -> Result<(), NotifyError>;

    async fn cancel(&self, identifier: &str) -> Result<(), NotifyError>;

    async fn cancel_all(&self) -> Result<(), NotifyError>;

    async fn scheduled(&self) -> Vec<ScheduledNotification>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelConfig {
    pub name: &'static str,
    pub importance: Importance,
}

#[derive(Debug, Clone, Copy)]
pub struct NotificationOptions {
    pub device_capable: bool,
    pub permission: PermissionState,
}

struct Armed {
    notification: ScheduledNotification,
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    device_capable: bool,
    permission: Mutex<PermissionState>,
    channels: HashMap<Channel, ChannelConfig>,
    armed: Mutex<HashMap<String, Armed>>,
    next_generation: AtomicU64,
    delivery_tx: mpsc::Sender<DeliveredNotification>,
}

/// In-process notification center: every pending notification is a tokio
/// timer that hands the notification to the delivery loop when it fires.
#[derive(Clone)]
pub struct TimerNotificationCenter {
    inner: Arc<Inner>,
}

impl TimerNotificationCenter {
    /// Configures the notification channels. Call once at startup and share
    /// the returned handle.
    pub fn initialize(
        options: NotificationOptions,
        delivery_tx: mpsc::Sender<DeliveredNotification>,
    ) -> Self {
        let channels = Channel::ALL
            .into_iter()
            .map(|channel| {
                (
                    channel,
                    ChannelConfig {
                        name: channel.display_name(),
                        importance: channel.importance(),
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        info!(
            channels = channels.len(),
            device_capable = options.device_capable,
            permission = ?options.permission,
            "Notification center initialized"
        );

        Self {
            inner: Arc::new(Inner {
                device_capable: options.device_capable,
                permission: Mutex::new(options.permission),
                channels,
                armed: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                delivery_tx,
            }),
        }
    }

    pub fn channels(&self) -> HashMap<Channel, ChannelConfig> {
        self.inner.channels.clone()
    }
}

impl NotificationCenter for TimerNotificationCenter {
    fn is_device_capable(&self) -> bool {
        self.inner.device_capable
    }

    async fn permission_status(&self) -> PermissionState {
        *self.inner.permission.lock().await
    }

    async fn request_permission(&self) -> PermissionState {
        let mut permission = self.inner.permission.lock().await;
        if *permission == PermissionState::Undetermined {
            // No prompt UI here: undetermined resolves to granted
            *permission = PermissionState::Granted;
            info!("Notification permission granted");
        }
        *permission
    }

    async fn schedule(&self, notification: ScheduledNotification) -> Result<(), NotifyError> {
        if !self.inner.device_capable {
            return Err(NotifyError::Unsupported);
        }
        if *self.inner.permission.lock().await != PermissionState::Granted {
            return Err(NotifyError::PermissionDenied);
        }

        let fire_at = notification.trigger.first_fire();
        let now = Local::now().naive_local();
        if fire_at <= now {
            return Err(NotifyError::InvalidTrigger(format!(
                "{} is not in the future",
                fire_at
            )));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let identifier = notification.identifier.clone();

        let mut armed = self.inner.armed.lock().await;
        if let Some(previous) = armed.remove(&identifier) {
            previous.handle.abort();
            debug!(identifier = %identifier, "Replacing pending notification");
        }

        let handle = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.inner.delivery_tx.clone(),
            notification.clone(),
            generation,
        ));

        debug!(
            identifier = %identifier,
            channel = %notification.channel,
            fire_at = %fire_at,
            "Notification scheduled"
        );

        armed.insert(
            identifier,
            Armed {
                notification,
                generation,
                handle,
            },
        );

        Ok(())
    }

    async fn cancel(&self, identifier: &str) -> Result<(), NotifyError> {
        if let Some(previous) = self.inner.armed.lock().await.remove(identifier) {
            previous.handle.abort();
            debug!(identifier = %identifier, "Notification cancelled");
        }
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), NotifyError> {
        let mut armed = self.inner.armed.lock().await;
        let count = armed.len();
        for (_, previous) in armed.drain() {
            previous.handle.abort();
        }
        debug!(count, "All pending notifications cancelled");
        Ok(())
    }

    async fn scheduled(&self) -> Vec<ScheduledNotification> {
        let armed = self.inner.armed.lock().await;
        let mut notifications: Vec<_> = armed.values().map(|a| a.notification.clone()).collect();
        notifications.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        notifications
    }
}

async fn run_timer(
    inner: Weak<Inner>,
    delivery_tx: mpsc::Sender<DeliveredNotification>,
    notification: ScheduledNotification,
    generation: u64,
) {
    let mut fire_at = notification.trigger.first_fire();

    loop {
        tokio::time::sleep(duration_until(fire_at)).await;

        let delivered = DeliveredNotification {
            notification: notification.clone(),
            fired_at: fire_at,
        };
        if delivery_tx.send(delivered).await.is_err() {
            warn!(identifier = %notification.identifier, "Delivery loop is gone, dropping notification");
            break;
        }

        let next = match notification.trigger {
            Trigger::At { .. } => None,
            Trigger::Recurring { rule, .. } => rule.next_after(fire_at),
        };
        let Some(next) = next else { break };
        fire_at = next;

        let Some(shared) = inner.upgrade() else { return };
        let mut armed = shared.armed.lock().await;
        if let Some(entry) = armed.get_mut(&notification.identifier) {
            if entry.generation == generation {
                if let Trigger::Recurring { rule, .. } = entry.notification.trigger {
                    entry.notification.trigger = Trigger::Recurring { first: next, rule };
                }
            }
        }
    }

    let Some(inner) = inner.upgrade() else { return };
    let mut armed = inner.armed.lock().await;
    if armed
        .get(&notification.identifier)
        .is_some_and(|entry| entry.generation == generation)
    {
        armed.remove(&notification.identifier);
    }
}

fn duration_until(at: NaiveDateTime) -> Duration {
    let remaining = match Local.from_local_datetime(&at).earliest() {
        Some(target) => target.signed_duration_since(Local::now()),
        // Wall-clock time skipped by a DST change
        None => at - Local::now().naive_local(),
    };
    remaining.to_std().unwrap_or(Duration::ZERO)
}

/// Presents fired notifications. On this platform presentation is a
/// structured log line per notification.
pub async fn run_delivery_loop(
    mut delivery_rx: mpsc::Receiver<DeliveredNotification>,
    channels: HashMap<Channel, ChannelConfig>,
) {
    info!("Starting notification delivery loop");

    while let Some(delivered) = delivery_rx.recv().await {
        let notification = &delivered.notification;
        let (channel_name, importance) = channels
            .get(&notification.channel)
            .map(|c| (c.name, c.importance))
            .unwrap_or((notification.channel.display_name(), Importance::Default));

        metrics::NOTIFICATIONS_DELIVERED.inc();
        info!(
            identifier = %notification.identifier,
            channel = %notification.channel,
            channel_name,
            importance = ?importance,
            title = %notification.title,
            body = %notification.body,
            payload = ?notification.payload,
            fired_at = %delivered.fired_at,
            "Notification delivered"
        );
    }

    info!("Notification delivery loop stopped");
}
