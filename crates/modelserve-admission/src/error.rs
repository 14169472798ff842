//! Admission rejection reasons

use thiserror::Error;

/// Why a signed token was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Not three dot-separated segments
    #[error("invalid token format: expected header.payload.signature")]
    Format,

    /// Header segment is not base64url JSON
    #[error("invalid token header: {0}")]
    Header(String),

    /// Header names an algorithm other than HS256
    #[error("unsupported token algorithm: {0}")]
    Algorithm(String),

    /// Payload segment is not base64url JSON claims
    #[error("invalid token claims: {0}")]
    Claims(String),

    /// Signature segment does not match the recomputed HMAC
    #[error("invalid token signature")]
    Signature,

    /// `exp` lies in the past
    #[error("token has expired")]
    Expired,

    /// `type` is not an accepted token type
    #[error("invalid token type: {0}")]
    Type(String),
}

/// Why a ServeRequest write was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A field required at creation is empty
    #[error("{field} is required")]
    Required {
        /// JSON name of the field
        field: &'static str,
    },

    /// A numeric field is outside its allowed range
    #[error("{message}")]
    OutOfRange {
        /// JSON name of the field
        field: &'static str,
        /// Rejection reason shown to the caller
        message: String,
    },

    /// `runtimeParams` relies on shell quoting, which is never interpreted
    #[error("runtimeParams must be plain whitespace-separated arguments, found {found:?}")]
    RuntimeParams {
        /// First offending character
        found: char,
    },

    /// The authorization token annotation is present but invalid
    #[error("authorization token rejected: {0}")]
    Auth(#[from] TokenError),
}

impl ValidationError {
    /// JSON name of the offending field, if the error concerns one
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Required { field } | Self::OutOfRange { field, .. } => Some(*field),
            Self::RuntimeParams { .. } => Some("runtimeParams"),
            Self::Auth(_) => None,
        }
    }
}
