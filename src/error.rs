use thiserror::Error;

/// Failures talking to the remote wellbeing API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Errors caused by the connection rather than by the server's answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// Local persistence failures. These are always surfaced to the caller.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("notifications are not supported on this device")]
    Unsupported,
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
