//! Error types shared across the duelgate subsystems
//!
//! Each subsystem owns its own error enum next to the code that raises it;
//! this module holds the root type plus the configuration and storage errors
//! that every subsystem can hit.

use crate::duels::DuelError;
use crate::settlement::SettlementError;
use crate::tasks::TaskError;

/// Root error type for duelgate operations
#[derive(Debug, thiserror::Error)]
pub enum DuelgateError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Duel error: {0}")]
    Duel(#[from] DuelError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Persistence errors from the duel and task stores
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

/// Convenience type alias for Results
pub type DuelgateResult<T> = Result<T, DuelgateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let config_error = ConfigurationError::ValidationFailed("test".to_string());
        let error = DuelgateError::Configuration(config_error);

        assert!(error.to_string().contains("Configuration error"));
        assert!(error.to_string().contains("test"));
    }

    #[test]
    fn test_invalid_value_details() {
        let error = ConfigurationError::InvalidValue {
            field: "api.port".to_string(),
            value: "0".to_string(),
            reason: "Port cannot be zero".to_string(),
        };

        assert!(error.to_string().contains("api.port"));
        assert!(error.to_string().contains("Port cannot be zero"));
    }

    #[test]
    fn test_error_conversion() {
        let storage_error = StorageError::NotFound("task 7".to_string());
        let error: DuelgateError = storage_error.into();

        match error {
            DuelgateError::Storage(StorageError::NotFound(_)) => {}
            _ => panic!("Expected storage error"),
        }
        assert!(error.source().is_some());
    }

    #[test]
    fn test_serde_error_maps_to_corruption() {
        let parse = serde_json::from_str::<u64>("not-a-number").unwrap_err();
        let error: StorageError = parse.into();
        assert!(matches!(error, StorageError::CorruptedData(_)));
    }
}
