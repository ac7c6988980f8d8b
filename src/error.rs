use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Closed set of failure classes surfaced at and above the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPat,
    InsufficientPermissions,
    WorkItemNotFound,
    RateLimitExceeded,
    ServerError,
    ApiError,
    NetworkError,
    InvalidPbiInfo,
    InvalidPbiData,
    ValidationError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::InvalidPat,
        ErrorCode::InsufficientPermissions,
        ErrorCode::WorkItemNotFound,
        ErrorCode::RateLimitExceeded,
        ErrorCode::ServerError,
        ErrorCode::ApiError,
        ErrorCode::NetworkError,
        ErrorCode::InvalidPbiInfo,
        ErrorCode::InvalidPbiData,
        ErrorCode::ValidationError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPat => "INVALID_PAT",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::WorkItemNotFound => "WORK_ITEM_NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::ApiError => "API_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::InvalidPbiInfo => "INVALID_PBI_INFO",
            ErrorCode::InvalidPbiData => "INVALID_PBI_DATA",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimitExceeded
                | ErrorCode::ServerError
                | ErrorCode::NetworkError
                | ErrorCode::ValidationError
        )
    }

    /// Short display text attached to every error of this class.
    pub fn default_user_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPat => "Your personal access token is invalid or has expired.",
            ErrorCode::InsufficientPermissions => {
                "Your access token does not have permission to read this work item."
            }
            ErrorCode::WorkItemNotFound => "The work item could not be found.",
            ErrorCode::RateLimitExceeded => {
                "Too many requests. Please wait a moment and try again."
            }
            ErrorCode::ServerError => {
                "Azure DevOps is having trouble right now. Please try again later."
            }
            ErrorCode::ApiError => "Azure DevOps returned an unexpected response.",
            ErrorCode::NetworkError => "Could not reach Azure DevOps. Check your connection.",
            ErrorCode::InvalidPbiInfo => "The work item link is incomplete or malformed.",
            ErrorCode::InvalidPbiData => "The work item returned by Azure DevOps is incomplete.",
            ErrorCode::ValidationError => "Something went wrong while validating the work item.",
        }
    }

    /// Maps a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::InvalidPat,
            403 => ErrorCode::InsufficientPermissions,
            404 => ErrorCode::WorkItemNotFound,
            429 => ErrorCode::RateLimitExceeded,
            500..=599 => ErrorCode::ServerError,
            _ => ErrorCode::ApiError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure. Retryability is a property of the code, not of the instance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    pub user_message: String,
}

impl DomainError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            user_message: code.default_user_message().to_string(),
        }
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let code = ErrorCode::from_status(status);
        let snippet: String = body.chars().take(200).collect();
        let message = if snippet.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", snippet.trim())
        };
        Self::new(code, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn invalid_info(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPbiInfo, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPbiData, message)
    }

    pub fn retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl Serialize for DomainError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DomainError", 4)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("userMessage", &self.user_message)?;
        state.serialize_field("retryable", &self.retryable())?;
        state.end()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("authenticated encryption failed")]
    Seal,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("personal access token must be 52 Base64 characters")]
    InvalidTokenFormat,
    #[error("a personal access token is required on first save")]
    MissingToken,
    #[error("token encryption failed: {0}")]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}
