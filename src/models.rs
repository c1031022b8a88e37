use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub daily_reminders: bool,
    #[serde(default = "default_true")]
    pub appointment_reminders: bool,
    #[serde(default)]
    pub news_and_updates: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            daily_reminders: true,
            appointment_reminders: true,
            news_and_updates: false,
        }
    }
}

impl NotificationSettings {
    pub fn get(&self, key: SettingKey) -> bool {
        match key {
            SettingKey::DailyReminders => self.daily_reminders,
            SettingKey::AppointmentReminders => self.appointment_reminders,
            SettingKey::NewsAndUpdates => self.news_and_updates,
        }
    }

    pub fn set(&mut self, key: SettingKey, value: bool) {
        match key {
            SettingKey::DailyReminders => self.daily_reminders = value,
            SettingKey::AppointmentReminders => self.appointment_reminders = value,
            SettingKey::NewsAndUpdates => self.news_and_updates = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    DailyReminders,
    AppointmentReminders,
    NewsAndUpdates,
}

impl SettingKey {
    pub const ALL: [SettingKey; 3] = [
        SettingKey::DailyReminders,
        SettingKey::AppointmentReminders,
        SettingKey::NewsAndUpdates,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::DailyReminders => "dailyReminders",
            SettingKey::AppointmentReminders => "appointmentReminders",
            SettingKey::NewsAndUpdates => "newsAndUpdates",
        }
    }
}

impl FromStr for SettingKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ParseError::new("setting", s))
    }
}

/// OS-level grouping for local notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Mood,
    Appointment,
    Goal,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Default,
    Low,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Mood,
        Channel::Appointment,
        Channel::Goal,
        Channel::Report,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Channel::Mood => "mood",
            Channel::Appointment => "appointment",
            Channel::Goal => "goal",
            Channel::Report => "report",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Channel::Mood => "Mood check-ins",
            Channel::Appointment => "Appointment reminders",
            Channel::Goal => "Goal deadlines",
            Channel::Report => "Monthly reports",
        }
    }

    pub fn importance(self) -> Importance {
        match self {
            Channel::Appointment => Importance::High,
            Channel::Mood | Channel::Goal => Importance::Default,
            Channel::Report => Importance::Low,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Recurrence {
    /// Fires on the last calendar day of every month at `at`.
    LastDayOfMonth { at: NaiveTime },
}

impl Recurrence {
    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Recurrence::LastDayOfMonth { at } => timing::next_last_day_of_month(after, *at),
        }
    }
}

/// When a notification fires, in device-local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Trigger {
    At { at: NaiveDateTime },
    Recurring { first: NaiveDateTime, rule: Recurrence },
}

impl Trigger {
    pub fn first_fire(&self) -> NaiveDateTime {
        match self {
            Trigger::At { at } => *at,
            Trigger::Recurring { first, .. } => *first,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub trigger: Trigger,
    pub channel: Channel,
    /// Routing data handed back to the app when the notification is opened.
    pub payload: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveredNotification {
    pub notification: ScheduledNotification,
    pub fired_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Undetermined,
}

impl FromStr for PermissionState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "granted" => Ok(PermissionState::Granted),
            "denied" => Ok(PermissionState::Denied),
            "undetermined" => Ok(PermissionState::Undetermined),
            _ => Err(ParseError::new("permission state", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(ParseError::new("http method", s)),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// An API call issued by the app, before it is sent or queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingRequest {
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// A request persisted while the API was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRequest {
    pub id: i64,
    pub endpoint: String,
    pub method: HttpMethod,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn to_outgoing(&self) -> Result<OutgoingRequest, serde_json::Error> {
        let body = match &self.body {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };
        Ok(OutgoingRequest {
            endpoint: self.endpoint.clone(),
            method: self.method,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoodEntry {
    pub id: Option<String>,
    pub recorded_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: String,
    pub starts_at: NaiveDateTime,
    pub professional: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub deadline: Option<NaiveDateTime>,
    pub completed: bool,
}
