//! Error types for Crane
//!
//! Every failure the deployment core can produce maps onto a closed
//! [`ErrorKind`]. Callers branch on the kind (and the offending field for
//! validation failures) instead of parsing message text; only the HTTP
//! boundary turns a kind into a status code.

use serde::Serialize;
use thiserror::Error;

/// Result type for Crane operations
pub type Result<T> = std::result::Result<T, CraneError>;

/// Closed taxonomy of error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidName,
    InvalidCpu,
    InvalidMemory,
    InvalidRestartDelay,
    InvalidRestartWindow,
    InvalidPlacement,
    InvalidUpdateDelay,
    InvalidEndpoint,
    InvalidImageName,
    InvalidSpec,
    VersionConflict,
    ClusterUnavailable,
    PartialRemoveFailure,
    NotFound,
    ServiceNotFound,
    GroupNotFound,
    Cluster,
    Cancelled,
    Timeout,
    PermissionDenied,
    InvalidConfig,
    Internal,
}

impl ErrorKind {
    /// Stable numeric code reported to API clients
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::InvalidName => 11001,
            ErrorKind::InvalidCpu => 11002,
            ErrorKind::InvalidMemory => 11003,
            ErrorKind::InvalidRestartDelay => 11004,
            ErrorKind::InvalidRestartWindow => 11005,
            ErrorKind::InvalidPlacement => 11006,
            ErrorKind::InvalidUpdateDelay => 11007,
            ErrorKind::InvalidEndpoint => 11008,
            ErrorKind::InvalidImageName => 11009,
            ErrorKind::InvalidSpec => 11010,
            ErrorKind::VersionConflict => 12001,
            ErrorKind::ClusterUnavailable => 12002,
            ErrorKind::Cluster => 12003,
            ErrorKind::ServiceNotFound => 12004,
            ErrorKind::NotFound => 13001,
            ErrorKind::PartialRemoveFailure => 13002,
            ErrorKind::GroupNotFound => 14001,
            ErrorKind::PermissionDenied => 14002,
            ErrorKind::Cancelled => 10001,
            ErrorKind::Timeout => 10002,
            ErrorKind::InvalidConfig => 10003,
            ErrorKind::Internal => 10000,
        }
    }

    /// Whether the kind was produced by spec validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidName
                | ErrorKind::InvalidCpu
                | ErrorKind::InvalidMemory
                | ErrorKind::InvalidRestartDelay
                | ErrorKind::InvalidRestartWindow
                | ErrorKind::InvalidPlacement
                | ErrorKind::InvalidUpdateDelay
                | ErrorKind::InvalidEndpoint
                | ErrorKind::InvalidImageName
                | ErrorKind::InvalidSpec
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A member service that could not be removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoveFailure {
    /// Full service name
    pub service: String,
    /// Why the removal failed
    pub reason: String,
}

/// Crane error types
#[derive(Error, Debug)]
pub enum CraneError {
    #[error("Invalid name ({field}): {message}")]
    InvalidName { field: String, message: String },

    #[error("Invalid cpu ({field}): {message}")]
    InvalidCpu { field: String, message: String },

    #[error("Invalid memory ({field}): {message}")]
    InvalidMemory { field: String, message: String },

    #[error("Invalid restart delay ({field}): {message}")]
    InvalidRestartDelay { field: String, message: String },

    #[error("Invalid restart window ({field}): {message}")]
    InvalidRestartWindow { field: String, message: String },

    #[error("Invalid placement ({field}): {message}")]
    InvalidPlacement { field: String, message: String },

    #[error("Invalid update delay ({field}): {message}")]
    InvalidUpdateDelay { field: String, message: String },

    #[error("Invalid endpoint ({field}): {message}")]
    InvalidEndpoint { field: String, message: String },

    #[error("Invalid image name ({field}): {message}")]
    InvalidImageName { field: String, message: String },

    #[error("Invalid service spec ({field}): {message}")]
    InvalidSpec { field: String, message: String },

    #[error("Version conflict on service {service}: {message}")]
    VersionConflict { service: String, message: String },

    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error(
        "Failed to remove {} service(s) from stack {namespace}: {}",
        .failures.len(),
        describe_failures(.failures)
    )]
    PartialRemoveFailure {
        namespace: String,
        removed: Vec<String>,
        failures: Vec<RemoveFailure>,
    },

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(u64),

    #[error("Cluster error ({status}): {message}")]
    Cluster { status: u16, message: String },

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CraneError {
    /// Build a validation error of the given kind
    ///
    /// Non-validation kinds fall back to `InvalidSpec`.
    pub fn invalid(kind: ErrorKind, field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let message = message.into();
        match kind {
            ErrorKind::InvalidName => CraneError::InvalidName { field, message },
            ErrorKind::InvalidCpu => CraneError::InvalidCpu { field, message },
            ErrorKind::InvalidMemory => CraneError::InvalidMemory { field, message },
            ErrorKind::InvalidRestartDelay => CraneError::InvalidRestartDelay { field, message },
            ErrorKind::InvalidRestartWindow => CraneError::InvalidRestartWindow { field, message },
            ErrorKind::InvalidPlacement => CraneError::InvalidPlacement { field, message },
            ErrorKind::InvalidUpdateDelay => CraneError::InvalidUpdateDelay { field, message },
            ErrorKind::InvalidEndpoint => CraneError::InvalidEndpoint { field, message },
            ErrorKind::InvalidImageName => CraneError::InvalidImageName { field, message },
            _ => CraneError::InvalidSpec { field, message },
        }
    }

    /// The closed kind this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            CraneError::InvalidName { .. } => ErrorKind::InvalidName,
            CraneError::InvalidCpu { .. } => ErrorKind::InvalidCpu,
            CraneError::InvalidMemory { .. } => ErrorKind::InvalidMemory,
            CraneError::InvalidRestartDelay { .. } => ErrorKind::InvalidRestartDelay,
            CraneError::InvalidRestartWindow { .. } => ErrorKind::InvalidRestartWindow,
            CraneError::InvalidPlacement { .. } => ErrorKind::InvalidPlacement,
            CraneError::InvalidUpdateDelay { .. } => ErrorKind::InvalidUpdateDelay,
            CraneError::InvalidEndpoint { .. } => ErrorKind::InvalidEndpoint,
            CraneError::InvalidImageName { .. } => ErrorKind::InvalidImageName,
            CraneError::InvalidSpec { .. } => ErrorKind::InvalidSpec,
            CraneError::VersionConflict { .. } => ErrorKind::VersionConflict,
            CraneError::ClusterUnavailable(_) => ErrorKind::ClusterUnavailable,
            CraneError::PartialRemoveFailure { .. } => ErrorKind::PartialRemoveFailure,
            CraneError::StackNotFound(_) => ErrorKind::NotFound,
            CraneError::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            CraneError::GroupNotFound(_) => ErrorKind::GroupNotFound,
            CraneError::Cluster { .. } => ErrorKind::Cluster,
            CraneError::Cancelled(_) => ErrorKind::Cancelled,
            CraneError::Timeout(_) => ErrorKind::Timeout,
            CraneError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CraneError::InvalidConfig(_) | CraneError::Json(_) | CraneError::Yaml(_) => {
                ErrorKind::InvalidConfig
            }
            CraneError::Io(_)
            | CraneError::Database(_)
            | CraneError::Lock(_)
            | CraneError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Offending field, for validation errors
    pub fn field(&self) -> Option<&str> {
        match self {
            CraneError::InvalidName { field, .. }
            | CraneError::InvalidCpu { field, .. }
            | CraneError::InvalidMemory { field, .. }
            | CraneError::InvalidRestartDelay { field, .. }
            | CraneError::InvalidRestartWindow { field, .. }
            | CraneError::InvalidPlacement { field, .. }
            | CraneError::InvalidUpdateDelay { field, .. }
            | CraneError::InvalidEndpoint { field, .. }
            | CraneError::InvalidImageName { field, .. }
            | CraneError::InvalidSpec { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            CraneError::InvalidName { message, .. }
            | CraneError::InvalidCpu { message, .. }
            | CraneError::InvalidMemory { message, .. }
            | CraneError::InvalidRestartDelay { message, .. }
            | CraneError::InvalidRestartWindow { message, .. }
            | CraneError::InvalidPlacement { message, .. }
            | CraneError::InvalidUpdateDelay { message, .. }
            | CraneError::InvalidEndpoint { message, .. }
            | CraneError::InvalidImageName { message, .. }
            | CraneError::InvalidSpec { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Prefix the offending field of a validation error
    ///
    /// Used when a service spec is validated as a member of a bundle so the
    /// field names the short name it came from.
    pub fn with_field_prefix(self, prefix: &str) -> Self {
        match self.field() {
            Some(field) => {
                let field = format!("{}.{}", prefix, field);
                let kind = self.kind();
                let message = self.message();
                CraneError::invalid(kind, field, message)
            }
            None => self,
        }
    }
}

impl From<reqwest::Error> for CraneError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            CraneError::ClusterUnavailable(err.to_string())
        } else if err.is_decode() {
            CraneError::Internal(format!("Invalid manager response: {}", err))
        } else {
            CraneError::ClusterUnavailable(err.to_string())
        }
    }
}

impl From<serde_yaml::Error> for CraneError {
    fn from(err: serde_yaml::Error) -> Self {
        CraneError::Yaml(err.to_string())
    }
}

/// Map a failed swarm manager response onto the error taxonomy
///
/// `service` names the service the call addressed, if any.
pub fn classify_manager_response(status: u16, message: &str, service: Option<&str>) -> CraneError {
    let lowered = message.to_lowercase();

    if lowered.contains("update out of sequence") || (status == 409 && service.is_some()) {
        return CraneError::VersionConflict {
            service: service.unwrap_or_default().to_string(),
            message: message.to_string(),
        };
    }

    match status {
        404 => CraneError::ServiceNotFound(
            service
                .map(|s| s.to_string())
                .unwrap_or_else(|| message.to_string()),
        ),
        503 => CraneError::ClusterUnavailable(message.to_string()),
        _ if lowered.contains("this node is not a swarm manager") => {
            CraneError::ClusterUnavailable(message.to_string())
        }
        _ => CraneError::Cluster {
            status,
            message: message.to_string(),
        },
    }
}

fn describe_failures(failures: &[RemoveFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.service, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}
