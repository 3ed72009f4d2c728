use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error-replyflow-config-1 Required environment variable not set: {var_name}")]
    EnvVarRequired { var_name: String },

    #[error("error-replyflow-config-2 Invalid port number: {port}")]
    InvalidPortNumber { port: String },

    #[error("error-replyflow-config-3 Invalid timeout value: {value}")]
    InvalidTimeout { value: String },

    #[error("error-replyflow-config-4 Invalid timezone: {value}")]
    InvalidTimezone { value: String },

    #[error("error-replyflow-config-5 Invalid value: {details}")]
    InvalidValue { details: String },
}

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("error-replyflow-signature-1 Signature header missing")]
    HeaderMissing,

    #[error("error-replyflow-signature-2 Signature header must use sha256=<hex> format")]
    InvalidHeaderFormat,

    #[error("error-replyflow-signature-3 Signature hex decoding failed: {details}")]
    InvalidHexDigest { details: String },

    #[error("error-replyflow-signature-4 Signature verification failed")]
    VerificationFailed,
}

#[derive(Error, Debug)]
pub enum NormalizerError {
    #[error("error-replyflow-normalizer-1 Delivery envelope is not valid JSON: {details}")]
    MalformedEnvelope { details: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("error-replyflow-storage-1 Database operation failed: {operation}: {details}")]
    DatabaseFailed { operation: String, details: String },

    #[error("error-replyflow-storage-2 Rule not found: {rule_id}")]
    RuleNotFound { rule_id: String },

    #[error("error-replyflow-storage-3 Invalid rule scope: {details}")]
    InvalidRuleScope { details: String },

    #[error("error-replyflow-storage-4 Legacy rule conversion failed: {details}")]
    LegacyConversionFailed { details: String },
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::DatabaseFailed {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum GateError {
    #[error("error-replyflow-gate-1 Execution count lookup failed: {details}")]
    CountLookupFailed { details: String },
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("error-replyflow-executor-1 Platform API request failed: {details}")]
    PlatformRequestFailed { details: String },

    #[error("error-replyflow-executor-2 Platform API request timed out after {timeout_ms}ms")]
    PlatformRequestTimeout { timeout_ms: u64 },

    #[error("error-replyflow-executor-3 Action has no response message: {action_kind}")]
    MissingResponseMessage { action_kind: String },

    #[error("error-replyflow-executor-4 Event is missing a target for action: {action_kind}")]
    MissingActionTarget { action_kind: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("error-replyflow-queue-1 Queue operation failed: {operation}: {details}")]
    OperationFailed { operation: String, details: String },

    #[error("error-replyflow-queue-2 Queue capacity exceeded: {capacity}")]
    CapacityExceeded { capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_format() {
        let err = SignatureError::InvalidHeaderFormat;
        assert!(err.to_string().starts_with("error-replyflow-signature-2"));

        let err = ConfigError::EnvVarRequired {
            var_name: "WEBHOOK_APP_SECRET".to_string(),
        };
        assert!(err.to_string().contains("WEBHOOK_APP_SECRET"));
    }

    #[test]
    fn test_storage_error_from_sqlx() {
        let err: StorageError = sqlx::Error::RowNotFound.into();
        assert!(err.to_string().starts_with("error-replyflow-storage-1"));
    }
}
