use service_core::error::AppError;
use thiserror::Error;

/// Failures of the usage and subscription backends.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Subscription not found: {0}")]
    NotFound(String),

    #[error("Invalid token limit {0}: must be null or a non-negative integer")]
    InvalidLimit(i64),

    #[error("Metrics backend unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Management backend unavailable: {0}")]
    ManagementUnavailable(String),
}

impl From<ManagerError> for AppError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::NotFound(_) => AppError::NotFound(anyhow::Error::new(err)),
            ManagerError::InvalidLimit(_) => AppError::BadRequest(anyhow::Error::new(err)),
            ManagerError::SourceUnavailable(_) | ManagerError::ManagementUnavailable(_) => {
                AppError::BadGateway(err.to_string())
            }
        }
    }
}
