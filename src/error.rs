use thiserror::Error;

/// Main error type for the delivery subsystem
#[derive(Error, Debug)]
pub enum RelayError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Journal errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("{operation} failed: {source}")]
    Journal {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{operation} failed after {attempts} attempts: {source}")]
    JournalExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("{operation} aborted: operation cancelled")]
    Aborted { operation: &'static str },

    // Delivery errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Account owner unavailable: {0}")]
    OwnerUnavailable(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors raised by journal and retry-event backends
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no journal row for command {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the storage-retry loop may try the operation again.
    ///
    /// Cancellation and missing rows are returned to the caller untouched;
    /// every other failure is assumed to be a passing storage hiccup.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::NotFound(_) | StoreError::Cancelled => false,
            StoreError::Database(sqlx::Error::RowNotFound) => false,
            StoreError::Database(_) | StoreError::Unavailable(_) => true,
        }
    }
}
