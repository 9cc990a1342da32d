//! Domain management error types

use nextslot_shared::DomainState;

/// Binding store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (hostname, token or primary flag)
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Record not found")]
    NotFound,
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) => {
                // PostgreSQL unique violation
                if db_err.code().as_deref() == Some("23505") {
                    return StoreError::Conflict(
                        db_err.constraint().unwrap_or("unique constraint").to_string(),
                    );
                }
                StoreError::Database(db_err.to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

/// Errors from domain validation and lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid hostname '{0}': {1}")]
    InvalidHostname(String, &'static str),
    #[error("Invalid subdomain label '{0}': {1}")]
    InvalidSubdomainLabel(String, &'static str),
    #[error("Hostname {0} is already bound to another account")]
    HostnameTaken(String),
    #[error("Hostname {0} is reserved by the platform")]
    ReservedHostname(String),
    #[error("Cannot {action} a domain in state {from}")]
    InvalidTransition {
        from: DomainState,
        action: &'static str,
    },
    #[error("Tenant not found")]
    TenantNotFound,
    #[error("Domain not found")]
    NotFound,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => DomainError::NotFound,
            other => DomainError::Store(other),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;
