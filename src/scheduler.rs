use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::RemoteApi;
use crate::metrics;
use crate::models::{
    Appointment, Channel, Goal, MoodEntry, Recurrence, ScheduledNotification, Trigger,
};
use crate::normalize;
use crate::notifier::NotificationCenter;
use crate::permission::PermissionGate;
use crate::settings::SettingsStore;
use crate::timing;

pub const MOOD_REMINDER_ID: &str = "daily-mood-reminder";
pub const MONTHLY_REPORT_ID: &str = "monthly-report";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub scheduled: Vec<String>,
    pub failed_channels: Vec<Channel>,
    pub schedule_failures: Vec<String>,
    pub skipped_records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass was already running; this one was dropped.
    Skipped,
    /// Device capability or permission refused; nothing was touched.
    Blocked,
}

/// Decides which local reminders are owed and (re)schedules them.
///
/// Every pass starts by cancelling everything previously scheduled, so the
/// pending set always reflects the latest pass only. Passes are
/// single-flight: a pass requested while another runs is dropped.
pub struct SmartScheduler<A, N> {
    api: Arc<A>,
    center: Arc<N>,
    gate: PermissionGate<N>,
    settings: Arc<SettingsStore>,
    in_flight: Mutex<()>,
}

impl<A, N> SmartScheduler<A, N>
where
    A: RemoteApi + Send + Sync,
    N: NotificationCenter + Send + Sync,
{
    pub fn new(api: Arc<A>, center: Arc<N>, settings: Arc<SettingsStore>) -> Self {
        Self {
            api,
            gate: PermissionGate::new(center.clone()),
            center,
            settings,
            in_flight: Mutex::new(()),
        }
    }

    pub async fn schedule_smart_notifications(&self, user_id: &str) -> PassOutcome {
        self.run_pass(user_id, Local::now().naive_local()).await
    }

    pub async fn run_pass(&self, user_id: &str, now: NaiveDateTime) -> PassOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            info!("Scheduling pass already running, dropping this one");
            metrics::SCHEDULING_PASSES_SKIPPED.inc();
            return PassOutcome::Skipped;
        };

        if !self.gate.allows_scheduling().await {
            info!("Notifications unavailable, skipping scheduling pass");
            return PassOutcome::Blocked;
        }

        metrics::SCHEDULING_PASSES.inc();
        let timer = metrics::PASS_DURATION.start_timer();
        let mut report = PassReport::default();

        if let Err(e) = self.center.cancel_all().await {
            warn!(error = %e, "Failed to cancel previously scheduled notifications");
        }

        let settings = match self.settings.load().await {
            Ok(settings) => Some(settings),
            Err(e) => {
                error!(error = %e, "Could not load notification settings, skipping opt-in reminders");
                None
            }
        };

        if settings.is_some_and(|s| s.daily_reminders) {
            self.schedule_mood_reminder(user_id, now, &mut report).await;
        }
        if settings.is_some_and(|s| s.appointment_reminders) {
            self.schedule_appointment_reminders(user_id, now, &mut report)
                .await;
        }
        self.schedule_goal_reminders(user_id, now, &mut report).await;

        match plan_monthly_report(now) {
            Some(notification) => self.place(notification, &mut report).await,
            None => warn!("Could not compute the monthly report date"),
        }

        timer.observe_duration();
        info!(
            scheduled = report.scheduled.len(),
            failed_channels = ?report.failed_channels,
            skipped_records = report.skipped_records,
            "Scheduling pass complete"
        );
        PassOutcome::Completed(report)
    }

    async fn schedule_mood_reminder(
        &self,
        user_id: &str,
        now: NaiveDateTime,
        report: &mut PassReport,
    ) {
        let entries = match self.api.mood_entries(user_id, now.date()).await {
            Ok(value) => normalize::mood_entries(&value),
            // The API answers "nothing logged" with an error status
            Err(e) if !e.is_transient() => {
                debug!(error = %e, "Mood endpoint answered with an error, treating as no entries");
                normalize::Normalized {
                    records: Vec::new(),
                    skipped: 0,
                }
            }
            Err(e) => return channel_failed(Channel::Mood, &e, report),
        };
        report.skipped_records += entries.skipped;

        if let Some(notification) = plan_mood_reminder(&entries.records, now) {
            self.place(notification, report).await;
        }
    }

    async fn schedule_appointment_reminders(
        &self,
        user_id: &str,
        now: NaiveDateTime,
        report: &mut PassReport,
    ) {
        let appointments = match self.api.appointments(user_id).await {
            Ok(value) => normalize::appointments(&value),
            Err(e) => return channel_failed(Channel::Appointment, &e, report),
        };
        report.skipped_records += appointments.skipped;

        for notification in plan_appointment_reminders(&appointments.records, now) {
            self.place(notification, report).await;
        }
    }

    async fn schedule_goal_reminders(
        &self,
        user_id: &str,
        now: NaiveDateTime,
        report: &mut PassReport,
    ) {
        let goals = match self.api.goals(user_id).await {
            Ok(value) => normalize::goals(&value),
            Err(e) => return channel_failed(Channel::Goal, &e, report),
        };
        report.skipped_records += goals.skipped;

        for notification in plan_goal_reminders(&goals.records, now) {
            self.place(notification, report).await;
        }
    }

    async fn place(&self, notification: ScheduledNotification, report: &mut PassReport) {
        let identifier = notification.identifier.clone();
        let fire_at = notification.trigger.first_fire();

        match self.center.schedule(notification).await {
            Ok(()) => {
                metrics::NOTIFICATIONS_SCHEDULED.inc();
                debug!(identifier = %identifier, fire_at = %fire_at, "Reminder scheduled");
                report.scheduled.push(identifier);
            }
            Err(e) => {
                metrics::NOTIFICATION_SCHEDULE_FAILURES.inc();
                warn!(identifier = %identifier, error = %e, "Failed to schedule reminder");
                report.schedule_failures.push(identifier);
            }
        }
    }
}

fn channel_failed(channel: Channel, e: &impl std::fmt::Display, report: &mut PassReport) {
    metrics::CHANNEL_FETCH_FAILURES.inc();
    warn!(channel = %channel, error = %e, "Fetch failed, skipping channel for this pass");
    report.failed_channels.push(channel);
}

fn payload(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Reminder to log a mood, owed only when nothing was logged today.
pub fn plan_mood_reminder(entries: &[MoodEntry], now: NaiveDateTime) -> Option<ScheduledNotification> {
    let today = now.date();
    if entries.iter().any(|entry| entry.recorded_on == today) {
        return None;
    }

    let at = timing::mood_reminder_time(now).filter(|at| *at > now)?;
    Some(ScheduledNotification {
        identifier: MOOD_REMINDER_ID.to_string(),
        title: "How are you feeling today?".to_string(),
        body: "You haven't logged your mood yet. Take a moment to check in with yourself."
            .to_string(),
        trigger: Trigger::At { at },
        channel: Channel::Mood,
        payload: payload(&[("screen", "MoodTracker")]),
    })
}

pub fn plan_appointment_reminders(
    appointments: &[Appointment],
    now: NaiveDateTime,
) -> Vec<ScheduledNotification> {
    appointments
        .iter()
        .filter_map(|appointment| {
            let at = timing::appointment_reminder_time(appointment.starts_at)
                .filter(|at| *at > now)?;
            let time = appointment.starts_at.format("%H:%M");
            let body = match &appointment.professional {
                Some(name) => format!("You have an appointment with {} tomorrow at {}.", name, time),
                None => format!("You have an appointment tomorrow at {}.", time),
            };
            Some(ScheduledNotification {
                identifier: format!("appointment-{}", appointment.id),
                title: "Upcoming appointment".to_string(),
                body,
                trigger: Trigger::At { at },
                channel: Channel::Appointment,
                payload: payload(&[
                    ("screen", "Appointments"),
                    ("appointmentId", appointment.id.as_str()),
                ]),
            })
        })
        .collect()
}

pub fn plan_goal_reminders(goals: &[Goal], now: NaiveDateTime) -> Vec<ScheduledNotification> {
    goals
        .iter()
        .filter(|goal| !goal.completed)
        .filter_map(|goal| {
            let deadline = goal.deadline.filter(|deadline| *deadline > now)?;
            let at = timing::goal_reminder_time(deadline).filter(|at| *at > now)?;
            Some(ScheduledNotification {
                identifier: format!("goal-{}", goal.id),
                title: "Goal deadline tomorrow".to_string(),
                body: format!("\"{}\" is due tomorrow. You've got this!", goal.title),
                trigger: Trigger::At { at },
                channel: Channel::Goal,
                payload: payload(&[("screen", "Goals"), ("goalId", goal.id.as_str())]),
            })
        })
        .collect()
}

pub fn plan_monthly_report(now: NaiveDateTime) -> Option<ScheduledNotification> {
    let first = timing::monthly_report_time(now)?;
    Some(ScheduledNotification {
        identifier: MONTHLY_REPORT_ID.to_string(),
        title: "Your monthly report is ready".to_string(),
        body: "See how your month went: moods, journal entries and goals in one place."
            .to_string(),
        trigger: Trigger::Recurring {
            first,
            rule: Recurrence::LastDayOfMonth { at: first.time() },
        },
        channel: Channel::Report,
        payload: payload(&[("screen", "Reports")]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::{PermissionState, SettingKey};
    use crate::testing::{FakeNotificationCenter, FakeRemoteApi};
    use chrono::NaiveDate;
    use serde_json::json;
    use tokio::sync::Notify;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn now() -> NaiveDateTime {
        dt(2026, 10, 18, 9, 30)
    }

    async fn build(
        api: FakeRemoteApi,
        center: FakeNotificationCenter,
    ) -> (
        SmartScheduler<FakeRemoteApi, FakeNotificationCenter>,
        Arc<FakeNotificationCenter>,
        Arc<SettingsStore>,
    ) {
        let center = Arc::new(center);
        let settings = Arc::new(SettingsStore::new(init_memory_pool().await));
        let scheduler = SmartScheduler::new(Arc::new(api), center.clone(), settings.clone());
        (scheduler, center, settings)
    }

    fn full_api() -> FakeRemoteApi {
        FakeRemoteApi::new(
            Some(json!([{"id": 1, "date": "2026-10-17"}])),
            Some(json!([
                {"id": "a1", "date": "2026-10-25", "time": "10:00"},
                {"id": "a2", "date": "2026-10-18", "time": "16:00"},
                {"id": "a3", "date": "2026-10-30"}
            ])),
            Some(json!({"goals": [
                {"id": 7, "title": "Meditate", "deadline": "2026-10-22", "completed": false},
                {"id": 8, "title": "Run", "deadline": "2026-10-22", "completed": true},
                {"id": 9, "title": "Old", "deadline": "2026-10-01"}
            ]})),
        )
    }

    fn completed(outcome: PassOutcome) -> PassReport {
        match outcome {
            PassOutcome::Completed(report) => report,
            other => panic!("expected a completed pass, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_pass_schedules_every_channel() {
        let (scheduler, center, _) = build(full_api(), FakeNotificationCenter::granted()).await;

        let report = completed(scheduler.run_pass("u1", now()).await);

        assert_eq!(
            center.identifiers(),
            vec![
                "appointment-a1",
                "daily-mood-reminder",
                "goal-7",
                "monthly-report"
            ]
        );
        assert_eq!(report.skipped_records, 1);
        assert!(report.failed_channels.is_empty());

        let mood = center.get(MOOD_REMINDER_ID).unwrap();
        assert_eq!(mood.trigger, Trigger::At { at: dt(2026, 10, 18, 14, 0) });
        let appointment = center.get("appointment-a1").unwrap();
        assert_eq!(appointment.trigger, Trigger::At { at: dt(2026, 10, 24, 18, 0) });
        assert_eq!(appointment.payload["appointmentId"], "a1");
        let goal = center.get("goal-7").unwrap();
        assert_eq!(goal.trigger, Trigger::At { at: dt(2026, 10, 21, 19, 0) });
        let report_notification = center.get(MONTHLY_REPORT_ID).unwrap();
        assert_eq!(report_notification.trigger.first_fire(), dt(2026, 10, 31, 20, 0));
    }

    #[tokio::test]
    async fn test_consecutive_passes_do_not_accumulate() {
        let (scheduler, center, _) = build(full_api(), FakeNotificationCenter::granted()).await;

        let first = completed(scheduler.run_pass("u1", now()).await);
        let second = completed(scheduler.run_pass("u1", now()).await);

        assert_eq!(first.scheduled.len(), second.scheduled.len());
        assert_eq!(center.identifiers().len(), second.scheduled.len());
        assert_eq!(center.cancel_all_calls(), 2);
    }

    #[tokio::test]
    async fn test_mood_logged_today_means_no_reminder() {
        let api = FakeRemoteApi::new(
            Some(json!({"feelings": [{"id": 2, "date": "2026-10-18"}]})),
            Some(json!([])),
            Some(json!([])),
        );
        let (scheduler, center, _) = build(api, FakeNotificationCenter::granted()).await;

        scheduler.run_pass("u1", now()).await;
        assert!(center.get(MOOD_REMINDER_ID).is_none());
    }

    #[tokio::test]
    async fn test_malformed_mood_response_counts_as_no_entries() {
        let api = FakeRemoteApi::new(
            Some(json!({"message": "internal error"})),
            Some(json!([])),
            Some(json!([])),
        );
        let (scheduler, center, _) = build(api, FakeNotificationCenter::granted()).await;

        let report = completed(scheduler.run_pass("u1", dt(2026, 10, 18, 19, 0)).await);
        assert!(report.failed_channels.is_empty());
        assert_eq!(
            center.get(MOOD_REMINDER_ID).unwrap().trigger,
            Trigger::At { at: dt(2026, 10, 19, 10, 0) }
        );
    }

    #[tokio::test]
    async fn test_mood_error_status_counts_as_no_entries() {
        let api = FakeRemoteApi::new(None, Some(json!([])), Some(json!([])))
            .mood_status(404, "no feelings found");
        let (scheduler, center, _) = build(api, FakeNotificationCenter::granted()).await;

        let report = completed(scheduler.run_pass("u1", now()).await);
        assert!(report.failed_channels.is_empty());
        assert_eq!(
            center.get(MOOD_REMINDER_ID).unwrap().trigger,
            Trigger::At { at: dt(2026, 10, 18, 14, 0) }
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_only_skips_that_channel() {
        let api = FakeRemoteApi::new(
            None,
            Some(json!([{"id": "a1", "date": "2026-10-25", "time": "10:00"}])),
            None,
        );
        let (scheduler, center, _) = build(api, FakeNotificationCenter::granted()).await;

        let report = completed(scheduler.run_pass("u1", now()).await);
        assert_eq!(report.failed_channels, vec![Channel::Mood, Channel::Goal]);
        assert_eq!(center.identifiers(), vec!["appointment-a1", "monthly-report"]);
    }

    #[tokio::test]
    async fn test_scheduling_failure_does_not_abort_pass() {
        let center = FakeNotificationCenter::granted();
        center.reject(MOOD_REMINDER_ID);
        let (scheduler, center, _) = build(full_api(), center).await;

        let report = completed(scheduler.run_pass("u1", now()).await);
        assert_eq!(report.schedule_failures, vec![MOOD_REMINDER_ID.to_string()]);
        assert!(center.get(MONTHLY_REPORT_ID).is_some());
        assert!(center.get("goal-7").is_some());
    }

    #[tokio::test]
    async fn test_disabled_settings_skip_opt_in_channels() {
        let api = full_api();
        let (scheduler, center, settings) = build(api, FakeNotificationCenter::granted()).await;
        settings.update(SettingKey::DailyReminders, false).await.unwrap();
        settings
            .update(SettingKey::AppointmentReminders, false)
            .await
            .unwrap();

        scheduler.run_pass("u1", now()).await;
        assert_eq!(center.identifiers(), vec!["goal-7", "monthly-report"]);
    }

    #[tokio::test]
    async fn test_denied_permission_is_a_silent_no_op() {
        let (scheduler, center, _) = build(
            full_api(),
            FakeNotificationCenter::new(true, PermissionState::Denied),
        )
        .await;

        assert_eq!(scheduler.run_pass("u1", now()).await, PassOutcome::Blocked);
        assert_eq!(center.cancel_all_calls(), 0);
        assert!(center.identifiers().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_dropped() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let api = full_api().holding(entered.clone(), release.clone());
        let (scheduler, center, _) = build(api, FakeNotificationCenter::granted()).await;
        let scheduler = Arc::new(scheduler);

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run_pass("u1", now()).await }
        });
        entered.notified().await;

        assert_eq!(scheduler.run_pass("u1", now()).await, PassOutcome::Skipped);

        release.notify_one();
        let report = completed(first.await.unwrap());
        assert_eq!(center.identifiers().len(), report.scheduled.len());
        assert_eq!(center.cancel_all_calls(), 1);
    }

    #[test]
    fn test_appointment_reminder_in_past_is_not_planned() {
        let appointments = vec![Appointment {
            id: "x".to_string(),
            starts_at: dt(2026, 10, 19, 8, 0),
            professional: None,
        }];
        // Reminder would be 2026-10-18 18:00
        assert_eq!(plan_appointment_reminders(&appointments, dt(2026, 10, 18, 17, 59)).len(), 1);
        assert!(plan_appointment_reminders(&appointments, dt(2026, 10, 18, 18, 0)).is_empty());
    }

    #[test]
    fn test_goal_rules() {
        let goal = |deadline, completed| Goal {
            id: "g".to_string(),
            title: "Journal".to_string(),
            deadline: Some(deadline),
            completed,
        };

        let due_soon = goal(dt(2026, 10, 20, 0, 0), false);
        let planned = plan_goal_reminders(&[due_soon], now());
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].trigger, Trigger::At { at: dt(2026, 10, 19, 19, 0) });

        assert!(plan_goal_reminders(&[goal(dt(2026, 10, 20, 0, 0), true)], now()).is_empty());
        // Reminder time already passed although the deadline is still ahead
        assert!(plan_goal_reminders(&[goal(dt(2026, 10, 18, 23, 0), false)], now()).is_empty());
        assert!(plan_goal_reminders(&[goal(dt(2026, 10, 1, 0, 0), false)], now()).is_empty());

        let open_ended = Goal {
            deadline: None,
            ..goal(dt(2026, 10, 20, 0, 0), false)
        };
        assert!(plan_goal_reminders(&[open_ended], now()).is_empty());
    }

    #[test]
    fn test_monthly_report_is_recurring() {
        let planned = plan_monthly_report(dt(2026, 10, 31, 21, 0)).unwrap();
        assert_eq!(
            planned.trigger,
            Trigger::Recurring {
                first: dt(2026, 11, 30, 20, 0),
                rule: Recurrence::LastDayOfMonth {
                    at: dt(2026, 11, 30, 20, 0).time()
                },
            }
        );
    }
}
