//! Cloud deployer error types

use crate::cidr::Ipv4Cidr;
use thiserror::Error;

/// How the retry layer treats a provider error.
///
/// Every backend maps its own error codes to one of these classes when it
/// builds a [`ProviderError`] (see `sandbox::classify_code` and the AWS
/// backend's `classify_code`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying: throttling, dependency still attached, not yet visible
    Transient,
    /// The resource is already gone; deletes treat this as success
    AlreadyAbsent,
    /// Anything else; surfaced immediately
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::AlreadyAbsent => write!(f, "already-absent"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// An error reported by a provider backend, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed ({code}, {class}): {message}")]
pub struct ProviderError {
    /// The provider call that failed, e.g. `DeleteVpc`
    pub operation: String,
    /// Backend specific error code, e.g. `DependencyViolation`
    pub code: String,
    pub message: String,
    pub class: ErrorClass,
}

impl ProviderError {
    pub fn new(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        class: ErrorClass,
    ) -> Self {
        Self {
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
            class,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    pub fn is_already_absent(&self) -> bool {
        self.class == ErrorClass::AlreadyAbsent
    }
}

/// Errors raised by the orchestration engine
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Bad environment state: {0}")]
    BadEnvironmentState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Address space exhausted: wanted {requested} /{prefix} block(s) in {pools:?}, only {available} free"
    )]
    AddressSpaceExhausted {
        pools: Vec<Ipv4Cidr>,
        prefix: u8,
        requested: usize,
        available: usize,
    },

    #[error("Operation timed out after {attempts} attempt(s): {operation}")]
    OperationTimedOut { operation: String, attempts: u32 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A create failed and so did the cleanup of what it left behind.
    ///
    /// The primary error is the one that matters to the caller; the secondary
    /// one is carried along so it is not lost.
    #[error("{primary} (compensation also failed: {secondary})")]
    Compensation {
        #[source]
        primary: Box<CloudError>,
        secondary: Box<CloudError>,
    },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("Unsupported by provider: {0}")]
    Unsupported(String),
}

impl CloudError {
    /// The error that caused the failure, looking through any compensation
    /// wrapper.
    pub fn primary(&self) -> &CloudError {
        match self {
            CloudError::Compensation { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Attach a failed compensation step to this error without hiding it.
    pub fn with_compensation_failure(self, secondary: CloudError) -> Self {
        CloudError::Compensation {
            primary: Box::new(self),
            secondary: Box::new(secondary),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Provider(e) if e.is_transient())
    }

    pub fn is_already_absent(&self) -> bool {
        matches!(self, CloudError::Provider(e) if e.is_already_absent())
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_looks_through_compensation() {
        let err = CloudError::OperationTimedOut {
            operation: "subnet subnet-1 visible".to_string(),
            attempts: 3,
        }
        .with_compensation_failure(CloudError::Provider(ProviderError::new(
            "DeleteSubnet",
            "DependencyViolation",
            "in use",
            ErrorClass::Transient,
        )));

        assert!(matches!(
            err.primary(),
            CloudError::OperationTimedOut { attempts: 3, .. }
        ));
        assert!(err.to_string().contains("compensation also failed"));
    }

    #[test]
    fn test_classification_helpers() {
        let gone = CloudError::from(ProviderError::new(
            "DeleteVpc",
            "InvalidVpcID.NotFound",
            "no such vpc",
            ErrorClass::AlreadyAbsent,
        ));
        assert!(gone.is_already_absent());
        assert!(!gone.is_transient());
    }
}
