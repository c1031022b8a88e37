use std::sync::Arc;
use tracing::{info, warn};

use crate::models::PermissionState;
use crate::notifier::NotificationCenter;

/// Decides whether local notifications may be scheduled at all.
///
/// A refusal is an expected outcome: it is logged and reported as `false`,
/// never as an error.
pub struct PermissionGate<N> {
    center: Arc<N>,
}

impl<N> PermissionGate<N>
where
    N: NotificationCenter + Send + Sync,
{
    pub fn new(center: Arc<N>) -> Self {
        Self { center }
    }

    pub fn ensure_device_capable(&self) -> bool {
        let capable = self.center.is_device_capable();
        if !capable {
            warn!("Local notifications are not supported on this device");
        }
        capable
    }

    /// Requests permission only when it has never been decided.
    pub async fn ensure_permission(&self) -> bool {
        let state = match self.center.permission_status().await {
            PermissionState::Undetermined => {
                info!("Requesting notification permission");
                self.center.request_permission().await
            }
            decided => decided,
        };

        if state != PermissionState::Granted {
            warn!(permission = ?state, "Notification permission not granted");
            return false;
        }
        true
    }

    pub async fn allows_scheduling(&self) -> bool {
        self.ensure_device_capable() && self.ensure_permission().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNotificationCenter;

    #[tokio::test]
    async fn test_requests_permission_once_when_undetermined() {
        let center = Arc::new(FakeNotificationCenter::new(true, PermissionState::Undetermined));
        let gate = PermissionGate::new(center.clone());

        assert!(gate.ensure_permission().await);
        assert!(gate.ensure_permission().await);
        assert_eq!(center.permission_requests(), 1);
    }

    #[tokio::test]
    async fn test_denied_permission_blocks_without_prompt() {
        let center = Arc::new(FakeNotificationCenter::new(true, PermissionState::Denied));
        let gate = PermissionGate::new(center.clone());

        assert!(!gate.allows_scheduling().await);
        assert_eq!(center.permission_requests(), 0);
    }

    #[tokio::test]
    async fn test_incapable_device_short_circuits() {
        let center = Arc::new(FakeNotificationCenter::new(false, PermissionState::Undetermined));
        let gate = PermissionGate::new(center.clone());

        assert!(!gate.allows_scheduling().await);
        assert_eq!(center.permission_requests(), 0);
    }
}
