//! SAI status codes and the error type returned by single-object calls.
//!
//! Bulk calls report one [`SaiStatus`] per entry; single-object calls return
//! [`SaiResult`]. Both carry the raw status so callers can classify it
//! (retry, idempotent success, fatal) without string matching.

use std::fmt;
use thiserror::Error;

/// SAI status codes matching `sai_status_t`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaiStatus {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    BufferOverflow = -8,
    Uninitialized = -12,
    TableFull = -13,
    MandatoryAttributeMissing = -14,
    NotImplemented = -15,
    AddrNotFound = -16,
    ObjectInUse = -17,
    InvalidObjectType = -18,
    InvalidObjectId = -19,
    NifTableFull = -21,
    HwTableFull = -22,
    NotExecuted = -23,
    InvalidAttribute = -24,
}

impl SaiStatus {
    pub fn is_success(&self) -> bool {
        *self == SaiStatus::Success
    }

    /// Resource exhaustion that may clear once other objects are freed.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            SaiStatus::InsufficientResources
                | SaiStatus::NoMemory
                | SaiStatus::TableFull
                | SaiStatus::NifTableFull
                | SaiStatus::HwTableFull
        )
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> SaiResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SaiError::from_status(self))
        }
    }
}

impl fmt::Display for SaiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaiStatus::Success => "SAI_STATUS_SUCCESS",
            SaiStatus::Failure => "SAI_STATUS_FAILURE",
            SaiStatus::NotSupported => "SAI_STATUS_NOT_SUPPORTED",
            SaiStatus::NoMemory => "SAI_STATUS_NO_MEMORY",
            SaiStatus::InsufficientResources => "SAI_STATUS_INSUFFICIENT_RESOURCES",
            SaiStatus::InvalidParameter => "SAI_STATUS_INVALID_PARAMETER",
            SaiStatus::ItemAlreadyExists => "SAI_STATUS_ITEM_ALREADY_EXISTS",
            SaiStatus::ItemNotFound => "SAI_STATUS_ITEM_NOT_FOUND",
            SaiStatus::BufferOverflow => "SAI_STATUS_BUFFER_OVERFLOW",
            SaiStatus::Uninitialized => "SAI_STATUS_UNINITIALIZED",
            SaiStatus::TableFull => "SAI_STATUS_TABLE_FULL",
            SaiStatus::MandatoryAttributeMissing => "SAI_STATUS_MANDATORY_ATTRIBUTE_MISSING",
            SaiStatus::NotImplemented => "SAI_STATUS_NOT_IMPLEMENTED",
            SaiStatus::AddrNotFound => "SAI_STATUS_ADDR_NOT_FOUND",
            SaiStatus::ObjectInUse => "SAI_STATUS_OBJECT_IN_USE",
            SaiStatus::InvalidObjectType => "SAI_STATUS_INVALID_OBJECT_TYPE",
            SaiStatus::InvalidObjectId => "SAI_STATUS_INVALID_OBJECT_ID",
            SaiStatus::NifTableFull => "SAI_STATUS_NIF_TABLE_FULL",
            SaiStatus::HwTableFull => "SAI_STATUS_HW_TABLE_FULL",
            SaiStatus::NotExecuted => "SAI_STATUS_NOT_EXECUTED",
            SaiStatus::InvalidAttribute => "SAI_STATUS_INVALID_ATTRIBUTE",
        };
        write!(f, "{}", s)
    }
}

/// Error type for single-object SAI operations.
#[derive(Debug, Clone, Error)]
pub enum SaiError {
    /// SAI API returned an error status.
    #[error("SAI operation failed: {status}")]
    Status { status: SaiStatus },

    /// Invalid parameter passed to SAI API.
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// The requested item was not found.
    #[error("Item not found: {item}")]
    NotFound { item: String },

    /// Object is in use and cannot be removed.
    #[error("Object in use: {object}")]
    ObjectInUse { object: String },
}

impl SaiError {
    pub fn from_status(status: SaiStatus) -> Self {
        SaiError::Status { status }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        SaiError::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        SaiError::NotFound { item: item.into() }
    }

    pub fn object_in_use(object: impl Into<String>) -> Self {
        SaiError::ObjectInUse {
            object: object.into(),
        }
    }

    /// Returns the status code this error corresponds to.
    pub fn status(&self) -> SaiStatus {
        match self {
            SaiError::Status { status } => *status,
            SaiError::InvalidParameter { .. } => SaiStatus::InvalidParameter,
            SaiError::NotFound { .. } => SaiStatus::ItemNotFound,
            SaiError::ObjectInUse { .. } => SaiStatus::ObjectInUse,
        }
    }

    /// Returns true if repeating the call later may succeed.
    pub fn is_retryable(&self) -> bool {
        let status = self.status();
        status.is_resource_exhausted() || status == SaiStatus::NotExecuted
    }
}

/// Result type for SAI operations.
pub type SaiResult<T> = Result<T, SaiError>;
