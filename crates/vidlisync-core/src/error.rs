use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Pipeline not ready: {0}")]
    NotReady(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Capacity reached: {0}")]
    Capacity(String),

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Stable wire code reported to clients in `error` messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReady(_) => "not_ready",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Capacity(_) => "capacity",
            Self::Malformed(_) => "malformed_input",
            Self::Upstream(_) => "upstream_failure",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "malformed_input",
            Self::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
