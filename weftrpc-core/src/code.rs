//! Protocol status codes and the RPC [`Status`] type.
//!
//! A server reports the outcome of an RPC in its trailer metadata: a decimal
//! `grpc-status` code and an optional `grpc-message` text. [`Code`] models
//! the seventeen protocol codes; [`Status`] pairs a code with its message.

use std::str::FromStr;

use serde::Serialize;

use crate::metadata::Metadata;

/// Trailer key carrying the decimal protocol status.
pub const STATUS_KEY: &str = "grpc-status";

/// Trailer key carrying the human-readable status message.
pub const STATUS_MESSAGE_KEY: &str = "grpc-message";

/// Protocol status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Get the snake_case name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
            Code::Unauthenticated => "unauthenticated",
        }
    }

    /// The decimal wire form used in trailer metadata.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse the decimal wire form. Unknown values map to [`Code::Unknown`].
    pub fn from_i32(value: i32) -> Code {
        match value {
            0 => Code::Ok,
            1 => Code::Canceled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Returns whether this code indicates a transient condition that may be
    /// resolved by retrying the call.
    ///
    /// The RPC should also be idempotent for a retry to be safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Code::Unavailable | Code::ResourceExhausted | Code::Aborted
        )
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl std::fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown status code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    /// Parse the decimal trailer form ("0" .. "16").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i32 = s.parse().map_err(|_| ParseCodeError(()))?;
        if (0..=16).contains(&value) {
            Ok(Code::from_i32(value))
        } else {
            Err(ParseCodeError(()))
        }
    }
}

/// The outcome of an RPC as reported by the peer.
///
/// # Example
///
/// ```
/// use weftrpc_core::{Code, Status};
///
/// let status = Status::new(Code::NotFound, "no such user");
/// assert_eq!(status.code(), Code::NotFound);
/// assert!(!status.is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    /// Create a new status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Create a new status with just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Extract the status from trailer metadata.
    ///
    /// Returns `None` if the trailers carry no parseable `grpc-status` key.
    pub fn from_trailers(trailers: &Metadata) -> Option<Self> {
        let code: Code = trailers.get(STATUS_KEY)?.parse().ok()?;
        Some(Self {
            code,
            message: trailers.get(STATUS_MESSAGE_KEY).map(str::to_owned),
        })
    }

    /// Get the status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// Get the status message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true for a zero (ok) status.
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Convenience wrapper for [`Code::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Create a canceled status.
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    /// Create an invalid argument status.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create a deadline exceeded status.
    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create a not found status.
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// Create an unimplemented status.
    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// Create an internal status.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Create an unavailable status.
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip_i32() {
        for value in 0..=16 {
            assert_eq!(Code::from_i32(value).as_i32(), value);
        }
        assert_eq!(Code::from_i32(99), Code::Unknown);
    }

    #[test]
    fn test_code_from_str_decimal() {
        assert_eq!("0".parse(), Ok(Code::Ok));
        assert_eq!("4".parse(), Ok(Code::DeadlineExceeded));
        assert_eq!("16".parse(), Ok(Code::Unauthenticated));
        assert_eq!("17".parse::<Code>(), Err(ParseCodeError(())));
        assert_eq!("ok".parse::<Code>(), Err(ParseCodeError(())));
    }

    #[test]
    fn test_code_is_retryable() {
        assert!(Code::Unavailable.is_retryable());
        assert!(Code::ResourceExhausted.is_retryable());
        assert!(Code::Aborted.is_retryable());

        assert!(!Code::Ok.is_retryable());
        assert!(!Code::DeadlineExceeded.is_retryable());
        assert!(!Code::Internal.is_retryable());
    }

    #[test]
    fn test_status_from_trailers() {
        let mut trailers = Metadata::new();
        trailers.insert(STATUS_KEY, "5").unwrap();
        trailers.insert(STATUS_MESSAGE_KEY, "no such user").unwrap();

        let status = Status::from_trailers(&trailers).unwrap();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), Some("no such user"));
    }

    #[test]
    fn test_status_from_trailers_missing() {
        let trailers = Metadata::new();
        assert!(Status::from_trailers(&trailers).is_none());

        let mut garbage = Metadata::new();
        garbage.insert(STATUS_KEY, "not-a-number").unwrap();
        assert!(Status::from_trailers(&garbage).is_none());
    }

    #[test]
    fn test_status_display() {
        let status = Status::not_found("resource missing");
        assert_eq!(status.to_string(), "not_found: resource missing");

        let status = Status::from_code(Code::Internal);
        assert_eq!(status.to_string(), "internal");
    }
}
