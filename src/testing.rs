//! In-memory stand-ins for the external collaborators, used by unit tests.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};

use crate::client::{RemoteApi, RequestTransport};
use crate::connectivity::Connectivity;
use crate::error::{ApiError, NotifyError};
use crate::models::{ConnectivityStatus, OutgoingRequest, PermissionState, ScheduledNotification};
use crate::notifier::NotificationCenter;

pub struct FakeNotificationCenter {
    capable: bool,
    permission: Mutex<PermissionState>,
    permission_requests: AtomicUsize,
    scheduled: Mutex<HashMap<String, ScheduledNotification>>,
    rejected: Mutex<HashSet<String>>,
    cancel_all_calls: AtomicUsize,
}

impl FakeNotificationCenter {
    pub fn new(capable: bool, permission: PermissionState) -> Self {
        Self {
            capable,
            permission: Mutex::new(permission),
            permission_requests: AtomicUsize::new(0),
            scheduled: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashSet::new()),
            cancel_all_calls: AtomicUsize::new(0),
        }
    }

    pub fn granted() -> Self {
        Self::new(true, PermissionState::Granted)
    }

    /// Makes `schedule` fail for this identifier.
    pub fn reject(&self, identifier: &str) {
        self.rejected.lock().unwrap().insert(identifier.to_string());
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub fn cancel_all_calls(&self) -> usize {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, identifier: &str) -> Option<ScheduledNotification> {
        self.scheduled.lock().unwrap().get(identifier).cloned()
    }

    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.scheduled.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl NotificationCenter for FakeNotificationCenter {
    fn is_device_capable(&self) -> bool {
        self.capable
    }

    async fn permission_status(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionState {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let mut permission = self.permission.lock().unwrap();
        if *permission == PermissionState::Undetermined {
            *permission = PermissionState::Granted;
        }
        *permission
    }

    async fn schedule(&self, notification: ScheduledNotification) -> Result<(), NotifyError> {
        if self.rejected.lock().unwrap().contains(&notification.identifier) {
            return Err(NotifyError::InvalidTrigger("rejected by fake".to_string()));
        }
        self.scheduled
            .lock()
            .unwrap()
            .insert(notification.identifier.clone(), notification);
        Ok(())
    }

    async fn cancel(&self, identifier: &str) -> Result<(), NotifyError> {
        self.scheduled.lock().unwrap().remove(identifier);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), NotifyError> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        self.scheduled.lock().unwrap().clear();
        Ok(())
    }

    async fn scheduled(&self) -> Vec<ScheduledNotification> {
        self.scheduled.lock().unwrap().values().cloned().collect()
    }
}

/// Remote API returning canned JSON. `None` answers with a network error.
#[derive(Default)]
pub struct FakeRemoteApi {
    pub mood: Option<Value>,
    pub appointments: Option<Value>,
    pub goals: Option<Value>,
    mood_status: Option<(u16, String)>,
    hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeRemoteApi {
    pub fn new(mood: Option<Value>, appointments: Option<Value>, goals: Option<Value>) -> Self {
        Self {
            mood,
            appointments,
            goals,
            ..Default::default()
        }
    }

    /// Blocks the mood fetch: `entered` is notified when the fetch starts
    /// and the fetch waits for `release`.
    pub fn holding(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.hold = Some((entered, release));
        self
    }

    /// Answers the mood fetch with an HTTP error status.
    pub fn mood_status(mut self, status: u16, body: &str) -> Self {
        self.mood_status = Some((status, body.to_string()));
        self
    }

    fn answer(value: &Option<Value>) -> Result<Value, ApiError> {
        value
            .clone()
            .ok_or_else(|| ApiError::Network("connection refused".to_string()))
    }
}

impl RemoteApi for FakeRemoteApi {
    async fn mood_entries(&self, _user_id: &str, _date: NaiveDate) -> Result<Value, ApiError> {
        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            release.notified().await;
        }
        if let Some((status, body)) = &self.mood_status {
            return Err(ApiError::Status {
                status: *status,
                body: body.clone(),
            });
        }
        Self::answer(&self.mood)
    }

    async fn appointments(&self, _user_id: &str) -> Result<Value, ApiError> {
        Self::answer(&self.appointments)
    }

    async fn goals(&self, _user_id: &str) -> Result<Value, ApiError> {
        Self::answer(&self.goals)
    }
}

/// Transport that records every request and fails the configured endpoints.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<OutgoingRequest>>,
    failing: Mutex<HashMap<String, bool>>,
}

impl FakeTransport {
    /// `transient` failures look like a lost connection, others like a
    /// server-side rejection.
    pub fn fail(&self, endpoint: &str, transient: bool) {
        self.failing
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), transient);
    }

    pub fn heal(&self, endpoint: &str) {
        self.failing.lock().unwrap().remove(endpoint);
    }

    pub fn sent(&self) -> Vec<OutgoingRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl RequestTransport for FakeTransport {
    async fn send(&self, request: &OutgoingRequest) -> Result<Value, ApiError> {
        self.sent.lock().unwrap().push(request.clone());
        match self.failing.lock().unwrap().get(&request.endpoint) {
            Some(true) => Err(ApiError::Network("connection reset".to_string())),
            Some(false) => Err(ApiError::Status {
                status: 422,
                body: "validation failed".to_string(),
            }),
            None => Ok(serde_json::json!({"ok": true})),
        }
    }
}

pub struct FakeConnectivity {
    status_tx: watch::Sender<ConnectivityStatus>,
}

impl FakeConnectivity {
    pub fn new(status: ConnectivityStatus) -> Self {
        Self {
            status_tx: watch::Sender::new(status),
        }
    }

    pub fn set(&self, status: ConnectivityStatus) {
        self.status_tx.send_replace(status);
    }
}

impl Connectivity for FakeConnectivity {
    fn status(&self) -> ConnectivityStatus {
        *self.status_tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status_tx.subscribe()
    }
}
