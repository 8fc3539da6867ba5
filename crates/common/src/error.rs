use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport/auth/rate-limit failure talking to the candle source.
    /// Retried on the next scheduled tick, never within the same tick.
    #[error("Feed error: {0}")]
    Fetch(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures worth retrying on a later tick. Everything else is
    /// either fatal (config) or a bug.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::Http(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
