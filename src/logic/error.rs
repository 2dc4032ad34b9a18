use thiserror::Error;

use crate::model::{DocumentKind, Id};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: DocumentKind, id: Id },
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: DocumentKind, id: Id },
    #[error("teacher belongs to school '{teacher_school}' but {kind} '{id}' belongs to school '{other_school}'")]
    SchoolMismatch {
        teacher_school: Id,
        kind: DocumentKind,
        id: Id,
        other_school: Id,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transaction aborted after {attempts} conflicting attempt(s)")]
    Conflict { attempts: u32 },
    /// One attempt lost a race on this document. The retry loop turns it
    /// into `Conflict` once the budget is spent.
    #[error("{kind} '{id}' changed during the transaction")]
    WriteConflict { kind: DocumentKind, id: Id },
    #[error("store failure: {0:#}")]
    Store(anyhow::Error),
}

impl AssignmentError {
    pub fn not_found(kind: DocumentKind, id: &str) -> Self {
        AssignmentError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AssignmentError::NotFound { .. } => "not_found",
            AssignmentError::AlreadyExists { .. } => "already_exists",
            AssignmentError::SchoolMismatch { .. } => "school_mismatch",
            AssignmentError::InvalidArgument(_) => "invalid_argument",
            AssignmentError::PermissionDenied(_) => "permission_denied",
            AssignmentError::Conflict { .. } | AssignmentError::WriteConflict { .. } => "conflict",
            AssignmentError::Store(_) => "internal",
        }
    }

    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, AssignmentError::WriteConflict { .. })
    }
}

impl From<StoreError> for AssignmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => AssignmentError::NotFound { kind, id },
            StoreError::AlreadyExists { kind, id } => AssignmentError::AlreadyExists { kind, id },
            StoreError::PermissionDenied(message) => AssignmentError::PermissionDenied(message),
            StoreError::Conflict { kind, id } => AssignmentError::WriteConflict { kind, id },
            StoreError::Backend(e) => AssignmentError::Store(e),
        }
    }
}
