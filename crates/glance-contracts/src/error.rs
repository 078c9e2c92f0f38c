use thiserror::Error;

/// Every way a dispatched request can fail.
///
/// The `Display` text is what callers show to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Failed to read screenshot: {0}")]
    IoError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image validation error: {0}")]
    InvalidFormat(String),

    #[error("Request timed out. Please try again.")]
    Timeout,

    #[error("API request failed: {0}")]
    NetworkError(String),

    #[error("API request failed ({status}): {body}")]
    HttpError { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn category(&self) -> &'static str {
        match self {
            Self::IoError(_) => "io_error",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidFormat(_) => "invalid_format",
            Self::Timeout => "timeout",
            Self::NetworkError(_) => "network_error",
            Self::HttpError { .. } => "http_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::MissingCredential(_) => "missing_credential",
            Self::Internal(_) => "internal",
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}
