use folio_cache::ConfigError;
use folio_scheduler::SchedulerError;
use thiserror::Error;

/// Errors constructing a [`PageImageService`](crate::PageImageService)
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service must be created inside a Tokio runtime
    #[error(transparent)]
    NoRuntime(#[from] SchedulerError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
