// Stigmer Core - Error taxonomy
//
// One error enum shared by every layer of the control plane. The variants
// mirror the status codes a caller sees, so controllers and the CLI never
// need to translate between layers.

use thiserror::Error;

/// Result alias used throughout the workspace
pub type StigmerResult<T> = Result<T, StigmerError>;

/// Control-plane error taxonomy
///
/// `PermissionDenied` is reserved for the cloud variant; the local core
/// treats policy failures as `InvalidArgument`.
#[derive(Debug, Clone, Error)]
pub enum StigmerError {
    /// Structural or field-constraint validation failure
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced resource does not exist
    #[error("{kind} not found: {what}")]
    NotFound { kind: String, what: String },

    /// A resource with the same slug already exists in the namespace
    #[error("{kind} already exists: {what}")]
    AlreadyExists { kind: String, what: String },

    /// Reserved for the cloud variant
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The ambient deadline elapsed before the operation finished
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Engine or runner unreachable; creates degrade, executions stay pending
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Unexpected store or engine error; the cause is always logged
    #[error("internal error: {0}")]
    Internal(String),
}

impl StigmerError {
    pub fn not_found(kind: impl Into<String>, what: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            what: what.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, what: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            what: what.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Stable machine-readable code, used by the wire envelope and the CLI
    pub fn code(&self) -> ErrorCode {
        match self {
            StigmerError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            StigmerError::NotFound { .. } => ErrorCode::NotFound,
            StigmerError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            // Local core folds policy failures into InvalidArgument
            StigmerError::PermissionDenied(_) => ErrorCode::InvalidArgument,
            StigmerError::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            StigmerError::Unavailable(_) => ErrorCode::Unavailable,
            StigmerError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StigmerError::NotFound { .. })
    }

    /// Rebuild an error from its wire form
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::InvalidArgument => StigmerError::InvalidArgument(message),
            ErrorCode::NotFound => StigmerError::NotFound {
                kind: "resource".to_string(),
                what: message,
            },
            ErrorCode::AlreadyExists => StigmerError::AlreadyExists {
                kind: "resource".to_string(),
                what: message,
            },
            ErrorCode::DeadlineExceeded => StigmerError::DeadlineExceeded(message),
            ErrorCode::Unavailable => StigmerError::Unavailable(message),
            ErrorCode::Internal => StigmerError::Internal(message),
        }
    }
}

/// Wire-level error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    DeadlineExceeded,
    Unavailable,
    Internal,
}

impl ErrorCode {
    /// Short remediation hint printed by the CLI under the error line
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "check the resource definition and retry",
            ErrorCode::NotFound => "verify the name with `stigmerctl list <kind>`",
            ErrorCode::AlreadyExists => "use `apply` to update the existing resource",
            ErrorCode::DeadlineExceeded => "retry with a longer deadline",
            ErrorCode::Unavailable => "the workflow engine is unreachable; check `stigmerctl logs --follow`",
            ErrorCode::Internal => "inspect daemon logs with `stigmerctl logs --follow`",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_folds_into_invalid_argument() {
        let err = StigmerError::PermissionDenied("nope".to_string());
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn code_round_trips_through_wire_form() {
        let err = StigmerError::unavailable("engine down");
        let rebuilt = StigmerError::from_code(err.code(), err.to_string());
        assert_eq!(rebuilt.code(), ErrorCode::Unavailable);
    }
}
