use std::env;
use tracing_subscriber::{fmt, EnvFilter};

pub fn setup_logging() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(format!("mindful_notifier={}", log_level));
        // Reduce noise from third-party libraries
        for directive in [
            "sqlx=warn",
            "hyper=warn",
            "reqwest=warn",
            "tower_http=warn",
        ] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    tracing::info!("Logging initialized");
}
