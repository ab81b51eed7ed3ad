//! Provisioning and control error types.

use hostgrid_core::{CatalogError, InvalidAction};
use hostgrid_runtime::RuntimeError;
use hostgrid_state::{StateError, TenantId};
use thiserror::Error;

use crate::archive::ArchiveError;

/// Errors surfaced by the lifecycle orchestrator.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),

    #[error("service not found: {tenant_id}/{service}")]
    ServiceNotFound { tenant_id: TenantId, service: String },

    #[error("unsupported service type: {0}")]
    UnsupportedServiceType(String),

    #[error("invalid {kind} {value:?}: {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("archive entry escapes the data directory: {entry}")]
    PathTraversalDetected { entry: String },

    #[error("archive extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("runtime operation failed: {0}")]
    RuntimeOperationFailed(#[from] RuntimeError),

    #[error("service declaration error: {0}")]
    Declaration(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

impl ProvisionError {
    /// Whether the caller, not the system, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::TenantNotFound(_)
                | Self::ServiceNotFound { .. }
                | Self::UnsupportedServiceType(_)
                | Self::InvalidIdentifier { .. }
                | Self::PathTraversalDetected { .. }
                | Self::InvalidAction(_)
                | Self::State(StateError::AlreadyExists(_))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TenantNotFound(_) | Self::ServiceNotFound { .. })
    }
}

impl From<CatalogError> for ProvisionError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::UnsupportedServiceType(name) => Self::UnsupportedServiceType(name),
            other => Self::Declaration(other.to_string()),
        }
    }
}

impl From<InvalidAction> for ProvisionError {
    fn from(e: InvalidAction) -> Self {
        Self::InvalidAction(e.0)
    }
}

impl From<ArchiveError> for ProvisionError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::PathTraversal { entry } => Self::PathTraversalDetected { entry },
            ArchiveError::Extraction(reason) => Self::ExtractionFailed(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_classified() {
        assert!(ProvisionError::TenantNotFound(1).is_client_error());
        assert!(ProvisionError::InvalidAction("x".into()).is_client_error());
        assert!(
            ProvisionError::State(StateError::AlreadyExists("username alice".into()))
                .is_client_error()
        );
        assert!(!ProvisionError::ExtractionFailed("disk full".into()).is_client_error());
        assert!(!ProvisionError::CloneFailed("exit 128".into()).is_client_error());
    }

    #[test]
    fn archive_errors_map_to_taxonomy() {
        let err: ProvisionError = ArchiveError::PathTraversal {
            entry: "../x".into(),
        }
        .into();
        assert!(matches!(err, ProvisionError::PathTraversalDetected { .. }));
    }
}
