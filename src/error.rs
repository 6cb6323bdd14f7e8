//! Error types and the soft-failure policy
//!
//! Remote failures are classified into an [`ErrorKind`]. A call site may only
//! turn an error into a default value when the pair (operation, kind) is listed
//! in [`SOFT_FAILURES`]; everything else propagates.

use std::fmt;
use thiserror::Error;

/// Errors raised by the Cloud API Client or the template transport
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("API request failed: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Conflict(_) => ErrorKind::Conflict,
            _ => ErrorKind::Other,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors raised by the Snapshot Store
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every item of an orchestrated batch that failed with a non-soft error.
///
/// Sibling items have already completed when this is raised; their results are
/// kept by the caller.
#[derive(Error, Debug)]
#[error("{operation} failed for {} item(s), first: {}", .failures.len(), first_failure(.failures))]
pub struct BatchError {
    pub operation: Operation,
    pub failures: Vec<(String, ApiError)>,
}

fn first_failure(failures: &[(String, ApiError)]) -> String {
    failures
        .first()
        .map(|(item, err)| format!("{item}: {err}"))
        .unwrap_or_default()
}

/// Errors surfaced to callers of the collector
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("{operation} failed: {source}")]
    Api {
        operation: Operation,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl CollectorError {
    pub fn api(operation: Operation, source: ApiError) -> Self {
        CollectorError::Api { operation, source }
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;

/// Coarse classification of an [`ApiError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Other,
}

/// Remote calls issued by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListResourceGroups,
    ResourceGroupListing,
    TargetedGet,
    DirectTemplate,
    DeploymentOperations,
    TemplateDownload,
    InstanceView,
    ManagedDisks,
    StorageAccounts,
    AccountKeys,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::ListResourceGroups => "list resource groups",
            Operation::ResourceGroupListing => "resource group listing",
            Operation::TargetedGet => "targeted get",
            Operation::DirectTemplate => "direct template",
            Operation::DeploymentOperations => "deployment operations",
            Operation::TemplateDownload => "template download",
            Operation::InstanceView => "instance view",
            Operation::ManagedDisks => "managed disks",
            Operation::StorageAccounts => "storage accounts",
            Operation::AccountKeys => "account keys",
        };
        f.write_str(name)
    }
}

/// Which error kinds an entry of [`SOFT_FAILURES`] absorbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbs {
    Kind(ErrorKind),
    Any,
}

/// The value a soft failure degrades to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// No value (missing template, skipped stack)
    Absent,
    /// Empty collection
    Empty,
    /// Power status reported as `off`
    PowerOff,
}

/// Power status reported for instances that disappeared mid-collection
pub const POWER_OFF: &str = "off";

/// The complete soft-failure surface of the collector.
pub const SOFT_FAILURES: &[(Operation, Absorbs, Fallback)] = &[
    // Templates were not stored for deployments created before 2016-03-20
    (
        Operation::DirectTemplate,
        Absorbs::Kind(ErrorKind::Conflict),
        Fallback::Absent,
    ),
    (
        Operation::DeploymentOperations,
        Absorbs::Kind(ErrorKind::NotFound),
        Fallback::Empty,
    ),
    // Instance deleted while we were collecting
    (
        Operation::InstanceView,
        Absorbs::Kind(ErrorKind::NotFound),
        Fallback::PowerOff,
    ),
    (Operation::TemplateDownload, Absorbs::Any, Fallback::Absent),
    (
        Operation::ResourceGroupListing,
        Absorbs::Kind(ErrorKind::NotFound),
        Fallback::Empty,
    ),
    (
        Operation::TargetedGet,
        Absorbs::Kind(ErrorKind::NotFound),
        Fallback::Absent,
    ),
];

/// Look up the fallback for `err` raised by `operation`, if it is a soft failure
pub fn soft_fallback(operation: Operation, err: &ApiError) -> Option<Fallback> {
    let kind = err.kind();
    SOFT_FAILURES
        .iter()
        .find(|(op, absorbs, _)| {
            *op == operation
                && match absorbs {
                    Absorbs::Any => true,
                    Absorbs::Kind(k) => *k == kind,
                }
        })
        .map(|(_, _, fallback)| *fallback)
}
