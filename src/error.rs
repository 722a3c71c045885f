use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors (fatal, pre-flight, never retried)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Index listing failed; the whole dispatch cycle aborts
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Per-bucket plan validation failure (terminal for the task)
    #[error("Plan validation error: {0}")]
    PlanValidation(String),

    /// Search cluster returned an error response
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Task queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Plan runner invocation failed (retryable)
    #[error("Runner error: {0}")]
    Runner(String),

    /// Operation exceeded its wall-clock bound (retryable)
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the queue layer should re-attempt the failed task
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Runner(_) | AppError::Timeout(_) | AppError::Cluster(_) | AppError::Queue(_)
        )
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Discovery(_) => "DISCOVERY_ERROR",
            AppError::PlanValidation(_) => "PLAN_VALIDATION_ERROR",
            AppError::Cluster(_) => "CLUSTER_ERROR",
            AppError::Queue(_) => "QUEUE_ERROR",
            AppError::Runner(_) => "RUNNER_FAILURE",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from serde_yaml::Error
impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from reqwest::Error
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::Cluster(err.to_string())
        }
    }
}

/// Conversion from redis::RedisError
impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Queue(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Configuration("test".to_string()).error_code(),
            "CONFIGURATION_ERROR"
        );
        assert_eq!(
            AppError::Runner("exit 1".to_string()).error_code(),
            "RUNNER_FAILURE"
        );
        assert_eq!(
            AppError::PlanValidation("empty".to_string()).error_code(),
            "PLAN_VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::Runner("exit 1".to_string()).is_retryable());
        assert!(AppError::Timeout("runner".to_string()).is_retryable());
        assert!(!AppError::Configuration("bad".to_string()).is_retryable());
        assert!(!AppError::PlanValidation("empty".to_string()).is_retryable());
    }
}
