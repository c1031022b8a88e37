//! Boundary adapters for the remote API.
//!
//! The API is loose about response shapes: the same endpoint may answer with
//! a bare array, an object wrapping the array, or an error object. Each
//! adapter accepts all of these and turns what it can into typed records.
//! Anything unexpected becomes "no records"; a record that cannot be read is
//! skipped on its own.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use tracing::warn;

use crate::metrics;
use crate::models::{Appointment, Goal, MoodEntry};

const MOOD_WRAPPERS: &[&str] = &["feelings", "entries", "moods", "data"];
const APPOINTMENT_WRAPPERS: &[&str] = &["appointments", "data"];
const GOAL_WRAPPERS: &[&str] = &["goals", "data"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub skipped: usize,
}

pub fn mood_entries(value: &Value) -> Normalized<MoodEntry> {
    normalize(value, MOOD_WRAPPERS, "mood entries", |obj| {
        let recorded_on = match text(obj, &["date"]) {
            Some(day) => parse_date(day)?,
            None => text(obj, &["createdAt", "created_at", "timestamp"])
                .and_then(parse_datetime)?
                .date(),
        };
        Some(MoodEntry {
            id: id_of(obj),
            recorded_on,
        })
    })
}

pub fn appointments(value: &Value) -> Normalized<Appointment> {
    normalize(value, APPOINTMENT_WRAPPERS, "appointments", |obj| {
        let date_text = text(obj, &["date", "appointmentDate"])?;
        let time_text = text(obj, &["time", "appointmentTime"])?;
        let starts_at = parse_date(date_text)?.and_time(parse_time(time_text)?);
        Some(Appointment {
            id: id_of(obj).unwrap_or_else(|| starts_at.format("%Y%m%dT%H%M").to_string()),
            starts_at,
            professional: text(obj, &["professionalName", "professional", "therapist"])
                .map(str::to_string),
        })
    })
}

pub fn goals(value: &Value) -> Normalized<Goal> {
    normalize(value, GOAL_WRAPPERS, "goals", |obj| {
        // No deadline is valid, just never reminded about
        let deadline = match text(obj, &["deadline", "dueDate", "targetDate"]) {
            Some(deadline) => Some(parse_datetime(deadline)?),
            None => None,
        };
        Some(Goal {
            id: id_of(obj)?,
            title: text(obj, &["title", "name"])
                .unwrap_or("your goal")
                .to_string(),
            deadline,
            completed: is_completed(obj),
        })
    })
}

fn normalize<T>(
    value: &Value,
    wrappers: &[&str],
    what: &str,
    parse: impl Fn(&Map<String, Value>) -> Option<T>,
) -> Normalized<T> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match wrappers
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
        {
            Some(items) => items.as_slice(),
            None => {
                warn!(what, "Response has no record list, treating as empty");
                &[]
            }
        },
        Value::Null => &[],
        _ => {
            warn!(what, "Unexpected response shape, treating as empty");
            &[]
        }
    };

    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for (index, item) in items.iter().enumerate() {
        match item.as_object().and_then(&parse) {
            Some(record) => records.push(record),
            None => {
                skipped += 1;
                metrics::MALFORMED_RECORDS.inc();
                warn!(what, index, "Skipping malformed record");
            }
        }
    }

    Normalized { records, skipped }
}

fn text<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn id_of(obj: &Map<String, Value>) -> Option<String> {
    ["id", "_id"].iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn is_completed(obj: &Map<String, Value>) -> bool {
    let flagged = ["completed", "isCompleted", "done"]
        .iter()
        .any(|key| obj.get(*key).and_then(Value::as_bool).unwrap_or(false));
    let status = text(obj, &["status"])
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "completed" | "done" | "achieved"))
        .unwrap_or(false);
    flagged || status
}

/// Calendar date as written. A timestamp keeps its own date, whatever its
/// offset, so `2026-11-02T00:00:00Z` is Nov 2 in every zone.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    parse_datetime(s).map(|dt| dt.date())
}

/// Instants with an offset are moved to local time. Date-only values
/// resolve to midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    ["%H:%M:%S%.f", "%H:%M", "%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(s, format).ok())
}
