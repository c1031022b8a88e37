//metrics.rs
use lazy_static::lazy_static;
use prometheus::{register_counter, register_histogram, Counter, Histogram, HistogramOpts, Opts};

lazy_static! {
    // Scheduler metrics
    pub static ref SCHEDULING_PASSES: Counter = register_counter!(Opts::new(
        "scheduling_passes_total",
        "Total number of smart scheduling passes run"
    ))
    .unwrap();

    pub static ref SCHEDULING_PASSES_SKIPPED: Counter = register_counter!(Opts::new(
        "scheduling_passes_skipped_total",
        "Scheduling passes dropped because another pass was running"
    ))
    .unwrap();

    pub static ref NOTIFICATIONS_SCHEDULED: Counter = register_counter!(Opts::new(
        "notifications_scheduled_total",
        "Total number of local notifications scheduled"
    ))
    .unwrap();

    pub static ref NOTIFICATION_SCHEDULE_FAILURES: Counter = register_counter!(Opts::new(
        "notification_schedule_failures_total",
        "Notifications the notification center refused to schedule"
    ))
    .unwrap();

    pub static ref NOTIFICATIONS_DELIVERED: Counter = register_counter!(Opts::new(
        "notifications_delivered_total",
        "Total number of local notifications that fired"
    ))
    .unwrap();

    pub static ref CHANNEL_FETCH_FAILURES: Counter = register_counter!(Opts::new(
        "channel_fetch_failures_total",
        "Remote fetches that failed during a scheduling pass"
    ))
    .unwrap();

    pub static ref MALFORMED_RECORDS: Counter = register_counter!(Opts::new(
        "malformed_records_total",
        "Remote records skipped because they could not be parsed"
    ))
    .unwrap();

    // Offline queue metrics
    pub static ref REQUESTS_QUEUED: Counter = register_counter!(Opts::new(
        "requests_queued_total",
        "Requests persisted for later replay"
    ))
    .unwrap();

    pub static ref REQUESTS_REPLAYED: Counter = register_counter!(Opts::new(
        "requests_replayed_total",
        "Queued requests replayed successfully"
    ))
    .unwrap();

    pub static ref REPLAY_FAILURES: Counter = register_counter!(Opts::new(
        "replay_failures_total",
        "Queued requests whose replay failed"
    ))
    .unwrap();

    // Timing metrics
    pub static ref PASS_DURATION: Histogram = register_histogram!(
        HistogramOpts::new(
            "scheduling_pass_duration_seconds",
            "Time taken by a smart scheduling pass"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    )
    .unwrap();
}

pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return format!("Error encoding metrics: {}", e);
    }

    match String::from_utf8(buffer) {
        Ok(metrics) => metrics,
        Err(e) => format!("Error converting metrics to string: {}", e),
    }
}
