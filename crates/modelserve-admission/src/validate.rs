//! ServeRequest admission validation
//!
//! A pure predicate over a defaulted candidate and the write verb. Required
//! fields are checked on create only, bounds on create and update, and the
//! optional signed token on every verb.

use chrono::{DateTime, Utc};
use kube::ResourceExt;

use modelserve_common::crd::{
    ServeRequest, ServeRequestSpec, MAX_CPU_LIMIT_MILLICORES, MAX_MEMORY_LIMIT_MB, MAX_REPLICAS,
};
use modelserve_common::{SigningSecret, AUTH_TOKEN_ANNOTATION};

use crate::error::ValidationError;
use crate::token::TokenVerifier;

/// Characters whose meaning depends on a shell; `runtimeParams` is never shell-parsed
const SHELL_QUOTING_CHARS: [char; 4] = ['"', '\'', '`', '\\'];

/// Write verb under admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Object is being created
    Create,
    /// Object is being updated
    Update,
    /// Object is being deleted
    Delete,
}

/// Admission validator for ServeRequests
#[derive(Debug)]
pub struct Validator {
    tokens: TokenVerifier,
}

impl Validator {
    /// Create a validator checking tokens against `secret`
    pub fn new(secret: &SigningSecret) -> Self {
        Self {
            tokens: TokenVerifier::new(secret),
        }
    }

    /// Accept or reject `request` for `operation` at time `now`.
    ///
    /// For deletes pass the stored object; only its token is checked. A missing
    /// token annotation is accepted: callers are authenticated by the gateway
    /// before they can reach the API server.
    pub fn validate(
        &self,
        operation: Operation,
        request: &ServeRequest,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        match operation {
            Operation::Create => {
                validate_required(&request.spec)?;
                validate_bounds(&request.spec)?;
                validate_runtime_params(&request.spec)?;
            }
            Operation::Update => {
                validate_bounds(&request.spec)?;
                validate_runtime_params(&request.spec)?;
            }
            Operation::Delete => {}
        }

        if let Some(token) = request.annotations().get(AUTH_TOKEN_ANNOTATION) {
            self.tokens.verify(token, now)?;
        }

        Ok(())
    }
}

fn validate_required(spec: &ServeRequestSpec) -> Result<(), ValidationError> {
    let required = [
        ("modelName", &spec.model_name),
        ("modelUuid", &spec.model_uuid),
        ("sourcePath", &spec.source_path),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ValidationError::Required { field });
        }
    }
    Ok(())
}

fn validate_bounds(spec: &ServeRequestSpec) -> Result<(), ValidationError> {
    if spec.replicas > MAX_REPLICAS {
        return Err(out_of_range(
            "replicas",
            format!("replicas cannot exceed {MAX_REPLICAS}"),
        ));
    }
    if spec.replicas < 1 {
        return Err(out_of_range("replicas", "replicas must be at least 1"));
    }
    if spec.memory_limit_mb > MAX_MEMORY_LIMIT_MB {
        return Err(out_of_range(
            "memoryLimitMB",
            format!("memoryLimitMB cannot exceed {MAX_MEMORY_LIMIT_MB} MB (32GB)"),
        ));
    }
    if spec.memory_limit_mb < 1 {
        return Err(out_of_range("memoryLimitMB", "memoryLimitMB must be positive"));
    }
    if spec.cpu_limit_millicores > MAX_CPU_LIMIT_MILLICORES {
        return Err(out_of_range(
            "cpuLimitMillicores",
            format!("cpuLimitMillicores cannot exceed {MAX_CPU_LIMIT_MILLICORES}m (16 cores)"),
        ));
    }
    if spec.cpu_limit_millicores < 1 {
        return Err(out_of_range(
            "cpuLimitMillicores",
            "cpuLimitMillicores must be positive",
        ));
    }
    Ok(())
}

fn validate_runtime_params(spec: &ServeRequestSpec) -> Result<(), ValidationError> {
    match spec
        .runtime_params
        .chars()
        .find(|c| SHELL_QUOTING_CHARS.contains(c))
    {
        Some(found) => Err(ValidationError::RuntimeParams { found }),
        None => Ok(()),
    }
}

fn out_of_range(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError::OutOfRange {
        field,
        message: message.into(),
    }
}
