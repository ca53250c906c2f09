//! Error types for the platform boundary and for the lifecycle operations.
//!
//! `PlatformError` is what a collaborator returns. `ProviderError` is what the
//! plugin host sees: the platform error unchanged, tagged with the logical
//! operation that failed.

use std::fmt;

use serde::Serialize;

/// Logical lifecycle operation, attached to every `ProviderError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Delete,
    ShutDown,
    GetStatus,
    List,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::ShutDown => "shutdown",
            Operation::GetStatus => "status",
            Operation::List => "list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by the virtualization platform collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("clone failed: {0}")]
    Clone(String),
    #[error("power operation failed: {0}")]
    PowerOp(String),
    #[error("destroy failed: {0}")]
    Destroy(String),
    #[error("inventory query failed: {0}")]
    Inventory(String),
}

impl PlatformError {
    /// Session open/auth failures are fatal to the whole operation.
    pub fn is_connection(&self) -> bool {
        matches!(self, PlatformError::Auth(_) | PlatformError::Connect(_))
    }
}

/// Errors surfaced by the lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{operation}: {source}")]
    Connection {
        operation: Operation,
        #[source]
        source: PlatformError,
    },
    #[error("{operation}: machine name {name:?} matches {count} instances")]
    AmbiguousName {
        operation: Operation,
        name: String,
        count: usize,
    },
    #[error("{operation}: {source}")]
    Platform {
        operation: Operation,
        #[source]
        source: PlatformError,
    },
    #[error("{operation}: cloned machine {name:?} ({machine_id}) cannot be resolved")]
    CreatedMachineMissing {
        operation: Operation,
        name: String,
        machine_id: String,
    },
    #[error("{operation}: machine name {name:?} is taken by {machine_id}, which is not in this cluster/role")]
    NameTaken {
        operation: Operation,
        name: String,
        machine_id: String,
    },
    #[error("{operation}: cancelled")]
    Cancelled { operation: Operation },
}

impl ProviderError {
    pub fn from_platform(operation: Operation, source: PlatformError) -> Self {
        if source.is_connection() {
            ProviderError::Connection { operation, source }
        } else {
            ProviderError::Platform { operation, source }
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            ProviderError::Connection { operation, .. }
            | ProviderError::AmbiguousName { operation, .. }
            | ProviderError::Platform { operation, .. }
            | ProviderError::CreatedMachineMissing { operation, .. }
            | ProviderError::NameTaken { operation, .. }
            | ProviderError::Cancelled { operation } => *operation,
        }
    }

    /// Stable machine-readable code, used in plugin responses.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Connection { .. } => "connection",
            ProviderError::AmbiguousName { .. } => "ambiguous_name",
            ProviderError::Platform { .. } => "platform",
            ProviderError::CreatedMachineMissing { .. } => "created_machine_missing",
            ProviderError::NameTaken { .. } => "name_taken",
            ProviderError::Cancelled { .. } => "cancelled",
        }
    }
}

pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
