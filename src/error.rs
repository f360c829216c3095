//! Top-level error hierarchy.
//!
//! Every module defines its own `thiserror`-derived error enum (see
//! `storage::StorageError`, `db::DbError`, `queue::QueueError`, ...). At the
//! boundaries that need to make a policy decision (HTTP responses, task
//! row state) those are folded into `CoreError`, which exposes an
//! [`ErrorKind`] via [`CoreError::kind`] rather than a duplicated field, so
//! callers match on kind once instead of re-deriving it per variant.

use crate::{
    background::BackgroundError, db::DbError, ingest::IngestError, queue::QueueError,
    search::SearchError, storage::StorageError, storage::admin::EndpointAdminError,
};
use thiserror::Error;

/// Coarse classification used for boundary translation (HTTP status, task
/// row state, retry policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Validation,
    Conflict,
    UpstreamUnavailable,
    Timeout,
    IntegrityViolated,
    Transient,
    Fatal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("integrity violated: {0}")]
    IntegrityViolated(String),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("background task error: {0}")]
    Background(#[from] BackgroundError),

    #[error("endpoint admin error: {0}")]
    EndpointAdmin(#[from] EndpointAdminError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::IntegrityViolated(_) => ErrorKind::IntegrityViolated,
            CoreError::Db(e) if e.is_retryable() => ErrorKind::Transient,
            CoreError::Db(_) => ErrorKind::Fatal,
            CoreError::Storage(_) => ErrorKind::UpstreamUnavailable,
            CoreError::Queue(_) => ErrorKind::Fatal,
            CoreError::Ingest(_) => ErrorKind::Fatal,
            CoreError::Search(_) => ErrorKind::Fatal,
            CoreError::Background(e) => match e {
                BackgroundError::EndpointBusy(_) => ErrorKind::Conflict,
                BackgroundError::EndpointNotFound(_) => ErrorKind::NotFound,
                BackgroundError::ConfirmationRequired
                | BackgroundError::LocalEndpointNotDeletable => ErrorKind::Validation,
                BackgroundError::Db(_) | BackgroundError::Storage(_) => ErrorKind::Fatal,
            },
            CoreError::EndpointAdmin(e) => match e {
                EndpointAdminError::NotFound(_) => ErrorKind::NotFound,
                EndpointAdminError::PathFrozen(_) | EndpointAdminError::ForceRequired(_, _) => {
                    ErrorKind::Conflict
                }
                EndpointAdminError::Db(_) => ErrorKind::Fatal,
                EndpointAdminError::Storage(_) => ErrorKind::UpstreamUnavailable,
            },
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }
}
