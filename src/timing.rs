//! Fire-time arithmetic for the smart scheduler.
//!
//! Everything here works on device-local wall-clock time (`NaiveDateTime`)
//! and takes `now` explicitly so the rules can be checked without a clock.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

pub const APPOINTMENT_REMINDER_HOUR: u32 = 18;
pub const GOAL_REMINDER_HOUR: u32 = 19;
pub const MONTHLY_REPORT_HOUR: u32 = 20;

/// Fire time for the "you have not logged your mood today" reminder.
///
/// Mornings get an early-afternoon nudge, afternoons an evening one, and
/// anything from 18:00 onwards is pushed to the next morning.
pub fn mood_reminder_time(now: NaiveDateTime) -> Option<NaiveDateTime> {
    let today = now.date();
    match now.hour() {
        h if h < 12 => today.and_hms_opt(14, 0, 0),
        h if h < 18 => today.and_hms_opt(20, 0, 0),
        _ => today.succ_opt()?.and_hms_opt(10, 0, 0),
    }
}

/// The evening before the appointment.
pub fn appointment_reminder_time(starts_at: NaiveDateTime) -> Option<NaiveDateTime> {
    starts_at
        .date()
        .pred_opt()?
        .and_hms_opt(APPOINTMENT_REMINDER_HOUR, 0, 0)
}

/// The evening before the goal's deadline.
pub fn goal_reminder_time(deadline: NaiveDateTime) -> Option<NaiveDateTime> {
    deadline
        .date()
        .pred_opt()?
        .and_hms_opt(GOAL_REMINDER_HOUR, 0, 0)
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = following_month(year, month);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Last day of the current month at 20:00, or of the next month once that
/// moment has passed.
pub fn monthly_report_time(now: NaiveDateTime) -> Option<NaiveDateTime> {
    next_last_day_of_month(now, NaiveTime::from_hms_opt(MONTHLY_REPORT_HOUR, 0, 0)?)
}

/// First "last day of a month at `at`" strictly after `after`.
pub fn next_last_day_of_month(after: NaiveDateTime, at: NaiveTime) -> Option<NaiveDateTime> {
    let this_month = last_day_of_month(after.year(), after.month())?.and_time(at);
    if this_month > after {
        return Some(this_month);
    }
    let (year, month) = following_month(after.year(), after.month());
    Some(last_day_of_month(year, month)?.and_time(at))
}

fn following_month(year: i32, month: u32) -> (i32, u32) {
    if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}
