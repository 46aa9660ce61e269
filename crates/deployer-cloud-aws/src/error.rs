//! AWS provider error types

use aws_sdk_ec2::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use deployer_cloud::{CloudError, ErrorClass, ProviderError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("{operation} failed ({code}): {message}")]
    Api {
        operation: String,
        code: String,
        message: String,
    },

    #[error("{operation}: response is missing {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    #[error("{operation}: invalid request: {source}")]
    Build {
        operation: &'static str,
        #[source]
        source: BuildError,
    },

    #[error("{operation}: unexpected value {value:?}")]
    Malformed {
        operation: &'static str,
        value: String,
    },
}

impl AwsError {
    /// Wrap a failed SDK call, keeping the service error code.
    ///
    /// Timeouts and connection failures carry no code; they are reported as
    /// `RequestTimeout` so the retry layer treats them as transient.
    pub fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let code = match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                "RequestTimeout".to_string()
            }
            _ => err.code().unwrap_or("Unknown").to_string(),
        };
        let message = err
            .message()
            .map(str::to_string)
            .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
        AwsError::Api {
            operation: operation.to_string(),
            code,
            message,
        }
    }

    /// Auto Scaling and Route 53 report a missing target through a generic
    /// code (`ValidationError`, `InvalidChangeBatch`) and say so in the
    /// message. Deletes use this to turn those into `*.NotFound`.
    pub fn missing_as_not_found(self) -> Self {
        match self {
            AwsError::Api {
                operation,
                code,
                message,
            } if !code.ends_with("NotFound") && message.to_ascii_lowercase().contains("not found") => {
                AwsError::Api {
                    operation,
                    code: format!("{}.NotFound", code),
                    message,
                }
            }
            other => other,
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            AwsError::Api { operation, .. } => operation.as_str(),
            AwsError::MissingField { operation, .. }
            | AwsError::Build { operation, .. }
            | AwsError::Malformed { operation, .. } => *operation,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        let operation = err.operation().to_string();
        let error = match err {
            AwsError::Api { code, message, .. } => {
                let class = classify_code(&code);
                ProviderError::new(operation, code, message, class)
            }
            other => ProviderError::new(operation, "InvalidResponse", other.to_string(), ErrorClass::Fatal),
        };
        CloudError::Provider(error)
    }
}

/// Error code table for EC2, ELB, Auto Scaling and Route 53
pub fn classify_code(code: &str) -> ErrorClass {
    match code {
        "DependencyViolation"
        | "RequestLimitExceeded"
        | "Throttling"
        | "ThrottlingException"
        | "RequestTimeout"
        | "ServiceUnavailable"
        | "Unavailable"
        | "InternalError"
        | "InternalFailure"
        | "ResourceInUse"
        | "ScalingActivityInProgress"
        | "InvalidIPAddress.InUse"
        | "InvalidGroup.InUse"
        | "PriorRequestNotComplete"
        | "IncorrectState" => ErrorClass::Transient,
        "NoSuchHostedZone" | "Gateway.NotAttached" => ErrorClass::AlreadyAbsent,
        c if c.ends_with("NotFound") => ErrorClass::AlreadyAbsent,
        _ => ErrorClass::Fatal,
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
