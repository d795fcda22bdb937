//! Provides the structured results which are handed out to callers.
//!
//! No call of the [Facade](crate::facade::Facade) ever fails with a panic or an error. Instead
//! each operation yields its own response shape which carries a **success** flag and an
//! [ErrorKind] describing why a call was rejected or failed.
//!
//! Each response shape provides its own explicit **failure** constructor. The
//! [throttle](crate::throttle) is handed this constructor when wrapping an operation, so that
//! rejections are always built in the exact shape the caller expects.
//!
//! # Examples
//!
//! ```
//! # use callisto::response::{AddOrUpdateResponse, ErrorKind, GetResponse};
//! let response = GetResponse::ok(42);
//! assert_eq!(response.success, true);
//! assert_eq!(response.value, Some(42));
//! assert_eq!(response.error, Some(ErrorKind::None));
//!
//! let response = GetResponse::<i32>::failure(ErrorKind::ClientBanned);
//! assert_eq!(response.success, false);
//! assert_eq!(response.value, None);
//!
//! let response = AddOrUpdateResponse::failure(ErrorKind::ResourceUpdateFailed);
//! assert_eq!(response.error, Some(ErrorKind::ResourceUpdateFailed));
//! ```
use std::fmt;
use std::fmt::Display;

/// Enumerates the reasons for which a call might not have succeeded.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The call succeeded.
    None,

    /// The resource provider failed to store the given value.
    ResourceUpdateFailed,

    /// The client is currently banned.
    ClientBanned,

    /// The client just crossed its rate limit and has been banned by this call.
    RateLimitExceeded,

    /// The resource provider failed to load a value or an unexpected fault occurred.
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::None => write!(f, "none"),
            ErrorKind::ResourceUpdateFailed => write!(f, "resource update failed"),
            ErrorKind::ClientBanned => write!(f, "client banned"),
            ErrorKind::RateLimitExceeded => write!(f, "rate limit exceeded"),
            ErrorKind::InternalError => write!(f, "internal error"),
        }
    }
}

/// Represents the result of reading a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse<V> {
    /// Determines if the value was successfully obtained.
    pub success: bool,

    /// Contains the value if the call succeeded.
    pub value: Option<V>,

    /// Contains the error kind. Successful calls report [ErrorKind::None].
    pub error: Option<ErrorKind>,
}

impl<V> GetResponse<V> {
    /// Creates a successful response carrying the given value.
    pub fn ok(value: V) -> Self {
        GetResponse {
            success: true,
            value: Some(value),
            error: Some(ErrorKind::None),
        }
    }

    /// Creates a failed response without a value.
    pub fn failure(error: ErrorKind) -> Self {
        GetResponse {
            success: false,
            value: None,
            error: Some(error),
        }
    }

    /// Returns the error kind of this response, treating an absent kind as [ErrorKind::None].
    pub fn error_kind(&self) -> ErrorKind {
        self.error.unwrap_or(ErrorKind::None)
    }
}

/// Represents the result of adding or updating a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddOrUpdateResponse {
    /// Determines if the value was successfully stored.
    pub success: bool,

    /// Contains the error kind. Successful calls report [ErrorKind::None].
    pub error: Option<ErrorKind>,
}

impl AddOrUpdateResponse {
    /// Creates a successful response.
    pub fn ok() -> Self {
        AddOrUpdateResponse {
            success: true,
            error: Some(ErrorKind::None),
        }
    }

    /// Creates a failed response.
    pub fn failure(error: ErrorKind) -> Self {
        AddOrUpdateResponse {
            success: false,
            error: Some(error),
        }
    }

    /// Returns the error kind of this response, treating an absent kind as [ErrorKind::None].
    pub fn error_kind(&self) -> ErrorKind {
        self.error.unwrap_or(ErrorKind::None)
    }
}
