//! Admission gate for ServeRequests
//!
//! Defaulting and validation run synchronously in the API server's write path
//! through a mutating and a validating webhook. Both are pure: the object
//! store is never touched while answering a review.

#![deny(missing_docs)]

pub mod error;
pub mod token;
pub mod validate;
pub mod webhook;

pub use error::{TokenError, ValidationError};
pub use token::{TokenClaims, TokenVerifier};
pub use validate::{Operation, Validator};
pub use webhook::{serve, webhook_router, ServerConfig, WebhookError, WebhookState};
