//! Error types.

use thiserror::Error;

use crate::resource_uri::ResourceKind;

/// Errors returned by the NetApp management client.
#[derive(Debug, Clone, Error)]
pub enum AnfError {
    /// The resource does not exist, or is not visible yet.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A long-running operation on the resource has not finished.
    #[error("operation in progress: {0}")]
    InProgress(String),

    /// The request conflicts with the current state of the resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other failure reported by the management API.
    #[error("request failed ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The resource id lacks a segment the request needs.
    #[error("invalid resource id '{id}': missing {segment}")]
    InvalidResourceId { id: String, segment: &'static str },
}

impl AnfError {
    pub fn is_not_found(&self) -> bool {
        match self {
            AnfError::NotFound(_) => true,
            AnfError::Api { status, .. } => *status == 404,
            _ => false,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, AnfError::InProgress(_))
    }

    /// Whether the error says the replication relationship is still being
    /// established.
    pub fn is_replication_creating(&self) -> bool {
        let message = self.to_string().to_lowercase();
        message.contains("creating") && message.contains("replication")
    }
}

/// Errors surfaced by the convergence waits.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The retry budget ran out before the condition was observed.
    #[error("{kind} {resource_id} did not become {condition} after {attempts} attempts")]
    Exhausted {
        kind: ResourceKind,
        resource_id: String,
        condition: String,
        attempts: u32,
    },

    /// A lookup failed with an error that is not worth retrying.
    #[error("waiting for {kind} {resource_id} failed: {source}")]
    Fatal {
        kind: ResourceKind,
        resource_id: String,
        #[source]
        source: AnfError,
    },
}

pub type Result<T> = std::result::Result<T, AnfError>;
